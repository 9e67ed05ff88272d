//! Per-endpoint transports.
//!
//! A [`Transport`] owns one [`ConnectionPool`](crate::socket::ConnectionPool)
//! and is meant to live as long as its endpoint: build it once with a
//! [`TransportFactory`] and share it across requests.

pub mod config;
pub mod factory;

pub use config::{TransportConfig, TransportConfigBuilder};
pub use factory::TransportFactory;

use crate::http::roundtrip::{Performing, RequestBody, RoundTrip};
use crate::socket::pool::ConnectionPool;
use http::Request;

/// Reusable HTTP/2 transport to one DoH endpoint.
///
/// Dropping the transport has the same effect as [`close`](Self::close).
pub struct Transport {
    chain: Box<dyn RoundTrip>,
    pool: ConnectionPool,
}

impl Transport {
    pub(crate) fn new(chain: Box<dyn RoundTrip>, pool: ConnectionPool) -> Self {
        Self { chain, pool }
    }

    /// Candidate addresses this transport dials.
    pub fn addrs(&self) -> &[String] {
        self.pool.addrs()
    }

    pub fn connection_count(&self) -> usize {
        self.pool.connection_count()
    }

    /// Close connections with no request in flight. The transport stays usable.
    pub fn close_idle_connections(&self) {
        self.pool.close_idle_connections();
    }

    /// Release every pooled connection; later requests fail with
    /// [`NetError::TransportClosed`](crate::NetError::TransportClosed).
    ///
    /// Response bodies still being read keep their connection until they
    /// end or are dropped.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl RoundTrip for Transport {
    fn perform(&self, req: Request<RequestBody>) -> Performing {
        self.chain.perform(req)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("pool", &self.pool).finish_non_exhaustive()
    }
}
