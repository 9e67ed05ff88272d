//! Connection establishment and pooling.
//!
//! - [`parallel`]: races TCP connects across candidate addresses
//! - [`tls`]: BoringSSL connector pinned to the endpoint hostname
//! - [`connectjob`]: dial → TLS flow with trace hooks
//! - [`pool`]: HTTP/2 connection pool with idle reaping

pub mod connectjob;
pub mod parallel;
pub mod pool;
pub mod tls;

pub use parallel::{ParallelDialer, TcpConnect, TcpConnector};
pub use pool::{ConnectionPool, PoolOptions};
pub use tls::{TlsConfig, TlsConnector, TlsProtocol, TrustAnchors};
