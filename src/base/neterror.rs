use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name {domain} not resolved: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Address invalid: {0}")]
    AddressInvalid(String),
    #[error("No candidate addresses to dial")]
    NoCandidateAddresses,
    #[error("{0}")]
    AllAttemptsFailed(DialErrors),

    // TLS Errors
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("SSL handshake failed: {0}")]
    SslHandshakeFailed(String),
    #[error("ALPN negotiation failed")]
    AlpnNegotiationFailed,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("HTTP/2 protocol error: {0}")]
    Http2ProtocolError(String),
    #[error("HTTP body error")]
    HttpBodyError,

    // Request lifecycle
    #[error("Request cancelled")]
    Cancelled,
    #[error("Request deadline exceeded")]
    TimedOut,
    #[error("Transport closed")]
    TransportClosed,
}

impl NetError {
    /// Chromium-compatible error code (`net_error_list.h`).
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Cancelled => -3,
            NetError::TimedOut => -7,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::AllAttemptsFailed(_) => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::SslHandshakeFailed(_) => -107,
            NetError::AddressInvalid(_) => -108,
            NetError::NoCandidateAddresses => -108,
            NetError::ConnectionTimedOut => -118,
            NetError::AlpnNegotiationFailed => -122,
            NetError::InvalidUrl => -300,
            NetError::Http2ProtocolError(_) => -337,
            // Custom codes (-10000 range, clear of Chromium's reserved blocks)
            NetError::HttpBodyError => -10001,
            NetError::TransportClosed => -10002,
        }
    }

    /// True for failures caused by the caller's request context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, NetError::Cancelled | NetError::TimedOut)
    }

    pub(crate) fn http2(err: hyper::Error) -> Self {
        NetError::Http2ProtocolError(err.to_string())
    }
}

/// One failed attempt of a parallel dial.
#[derive(Debug, Clone)]
pub struct DialFailure {
    pub addr: String,
    pub error: NetError,
}

/// Per-address failures of a parallel dial, in candidate order.
#[derive(Debug, Clone, Default)]
pub struct DialErrors(Vec<DialFailure>);

impl DialErrors {
    pub fn new(failures: Vec<DialFailure>) -> Self {
        Self(failures)
    }

    pub fn failures(&self) -> &[DialFailure] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DialErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} connection attempts failed", self.0.len())?;
        for (i, failure) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, failure.addr, failure.error)?;
        }
        Ok(())
    }
}
