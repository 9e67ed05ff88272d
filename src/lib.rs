//! # dohnet
//!
//! Network transport for DNS-over-HTTPS endpoints.
//!
//! `dohnet` turns an [`Endpoint`] (a logical hostname plus optional bootstrap
//! addresses) into a pooled HTTP/2 [`Transport`]. Cold requests race TCP
//! connects across every candidate address and keep the first that
//! succeeds; TLS is always verified against the logical hostname using
//! caller-supplied trust anchors.
//!
//! ## Features
//!
//! - **Parallel dialing**: all candidate addresses at once, losers closed
//! - **Pinned TLS**: BoringSSL, explicit trust anchors, session resumption
//! - **HTTP/2 only**: ALPN `h2`, one multiplexed connection per endpoint
//! - **Connection tracing**: per-connection [`ConnectInfo`] diagnostics
//! - **Cancellation**: per-request [`RequestContext`] with deadlines
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dohnet::{Endpoint, RequestBody, RoundTrip, TransportFactory, TrustAnchors};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dohnet::NetError> {
//!     let anchors = TrustAnchors::from_pem(&std::fs::read("roots.pem").unwrap())?;
//!     let endpoint = Endpoint::new("cloudflare-dns.com")
//!         .bootstrap(["1.1.1.1", "1.0.0.1"])
//!         .path("/dns-query");
//!     let transport = TransportFactory::new(anchors).build_endpoint_transport(&endpoint)?;
//!
//!     let req = http::Request::post("https://cloudflare-dns.com/")
//!         .header("content-type", "application/dns-message")
//!         .body(RequestBody::from(query_bytes()))
//!         .unwrap();
//!     let answer = transport.perform(req).await?.into_body().bytes().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Errors, io error context and request cancellation
//! - [`dns`] - Hostname resolution for non-literal candidates
//! - [`endpoint`] - Endpoint description and candidate addresses
//! - [`http`] - The [`RoundTrip`] contract, request rewriting, HTTP/2 settings
//! - [`socket`] - Parallel dialing, TLS and the connection pool
//! - [`trace`] - Connection hooks and the [`ConnectTracer`] decorator
//! - [`transport`] - [`TransportFactory`] and [`Transport`]

pub mod base;
pub mod dns;
pub mod endpoint;
pub mod http;
pub mod socket;
pub mod trace;
pub mod transport;

pub use crate::base::cancel::{CancelHandle, RequestContext};
pub use crate::base::neterror::{DialErrors, DialFailure, NetError};
pub use crate::endpoint::Endpoint;
pub use crate::http::{RequestBody, RequestRewriter, ResponseBody, RewriteTarget, RoundTrip};
pub use crate::socket::{TlsConfig, TrustAnchors};
pub use crate::trace::{ConnectInfo, ConnectTracer, OnConnect};
pub use crate::transport::{Transport, TransportConfig, TransportFactory};
