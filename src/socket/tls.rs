//! TLS configuration and handshakes with BoringSSL.
//!
//! Every connector is pinned to one logical hostname: that name is sent as
//! SNI and verified against the server certificate, whatever physical
//! address the TCP connection went to. Trust comes only from the
//! [`TrustAnchors`] passed in; the system store is never consulted.

use crate::base::neterror::NetError;
use crate::trace::TlsConnectionState;
use boring::ssl::{
    NameType, SslConnector, SslConnectorBuilder, SslMethod, SslRef, SslSession,
    SslSessionCacheMode, SslVerifyMode, SslVersion,
};
use boring::x509::store::{X509Store, X509StoreBuilder};
use boring::x509::X509;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// Sessions kept per server name when no capacity is configured.
pub const DEFAULT_SESSION_CACHE_CAPACITY: usize = 64;

/// Trusted root certificates, supplied by the caller.
#[derive(Clone, Default)]
pub struct TrustAnchors {
    certs: Vec<X509>,
}

impl TrustAnchors {
    pub fn new(certs: Vec<X509>) -> Self {
        Self { certs }
    }

    /// Parse one or more concatenated PEM certificates.
    pub fn from_pem(pem: &[u8]) -> Result<Self, NetError> {
        let certs = X509::stack_from_pem(pem).map_err(|e| {
            tracing::debug!(error = %e, "invalid trust anchor PEM");
            NetError::SslProtocolError
        })?;
        if certs.is_empty() {
            return Err(NetError::SslProtocolError);
        }
        Ok(Self { certs })
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    fn to_store(&self) -> Result<X509Store, NetError> {
        let mut store = X509StoreBuilder::new().map_err(|_| NetError::SslProtocolError)?;
        for cert in &self.certs {
            store.add_cert(cert.clone()).map_err(|_| NetError::SslProtocolError)?;
        }
        Ok(store.build())
    }
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchors").field("certs", &self.certs.len()).finish()
    }
}

/// TLS protocol versions a connector may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsProtocol {
    Tls12,
    Tls13,
}

impl TlsProtocol {
    fn ssl_version(self) -> SslVersion {
        match self {
            TlsProtocol::Tls12 => SslVersion::TLS1_2,
            TlsProtocol::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// TLS settings for DoH connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub min_version: TlsProtocol,
    pub max_version: TlsProtocol,
    /// ALPN protocols offered, in preference order.
    pub alpn_protos: Vec<String>,
    /// Resumable sessions kept per server name. 0 selects the default.
    pub session_cache_capacity: usize,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::default_doh()
    }
}

impl TlsConfig {
    /// HTTP/2 only, TLS 1.2 and newer.
    pub fn default_doh() -> Self {
        Self {
            min_version: TlsProtocol::Tls12,
            max_version: TlsProtocol::Tls13,
            alpn_protos: vec!["h2".to_string()],
            session_cache_capacity: DEFAULT_SESSION_CACHE_CAPACITY,
        }
    }

    /// ALPN protocol list in wire format.
    pub fn alpn_wire(&self) -> Result<Vec<u8>, NetError> {
        let mut alpn_wire = Vec::new();
        for proto in &self.alpn_protos {
            if proto.is_empty() || proto.len() > 255 {
                return Err(NetError::SslProtocolError);
            }
            alpn_wire.push(proto.len() as u8);
            alpn_wire.extend_from_slice(proto.as_bytes());
        }
        Ok(alpn_wire)
    }

    /// Apply this configuration to an SSL connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        if self.min_version > self.max_version {
            return Err(NetError::SslProtocolError);
        }
        builder
            .set_min_proto_version(Some(self.min_version.ssl_version()))
            .map_err(|_| NetError::SslProtocolError)?;
        builder
            .set_max_proto_version(Some(self.max_version.ssl_version()))
            .map_err(|_| NetError::SslProtocolError)?;

        if !self.alpn_protos.is_empty() {
            builder.set_alpn_protos(&self.alpn_wire()?).map_err(|_| NetError::SslProtocolError)?;
        }

        builder.set_verify(SslVerifyMode::PEER);
        Ok(())
    }
}

/// Bounded client-side session cache for TLS resumption.
///
/// Sessions are kept per server name, newest last; inserting beyond the
/// capacity evicts the oldest. A session is handed out at most once, since
/// TLS 1.3 tickets are single use.
pub struct SessionCache<S = SslSession> {
    capacity: usize,
    sessions: DashMap<String, VecDeque<S>>,
}

impl<S> SessionCache<S> {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_SESSION_CACHE_CAPACITY } else { capacity };
        Self { capacity, sessions: DashMap::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn insert(&self, server_name: &str, session: S) {
        let mut queue = self.sessions.entry(server_name.to_string()).or_default();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(session);
    }

    /// Remove and return the newest session for `server_name`.
    pub fn take(&self, server_name: &str) -> Option<S> {
        self.sessions.get_mut(server_name)?.pop_back()
    }

    pub fn len(&self, server_name: &str) -> usize {
        self.sessions.get(server_name).map(|q| q.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

/// TLS connector pinned to one logical hostname.
#[derive(Clone)]
pub struct TlsConnector {
    connector: SslConnector,
    hostname: String,
    sessions: Arc<SessionCache>,
}

impl TlsConnector {
    pub fn new(
        hostname: &str,
        anchors: &TrustAnchors,
        config: &TlsConfig,
    ) -> Result<Self, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        config.apply_to_builder(&mut builder)?;
        builder.set_cert_store(anchors.to_store()?);

        let sessions = Arc::new(SessionCache::new(config.session_cache_capacity));
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
        let cache = sessions.clone();
        let server_name = hostname.to_string();
        builder.set_new_session_callback(move |_ssl, session| cache.insert(&server_name, session));

        Ok(Self { connector: builder.build(), hostname: hostname.to_string(), sessions })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Run the client handshake over an established TCP stream.
    pub async fn handshake(&self, stream: TcpStream) -> Result<SslStream<TcpStream>, NetError> {
        let mut config = self.connector.configure().map_err(|_| NetError::SslProtocolError)?;
        if let Some(session) = self.sessions.take(&self.hostname) {
            // SAFETY: every cached session was issued on a connection created
            // from this connector's SSL context.
            if let Err(e) = unsafe { config.set_session(&session) } {
                tracing::debug!(error = %e, "session resumption skipped");
            }
        }

        tokio_boring::connect(config, &self.hostname, stream).await.map_err(|e| {
            tracing::debug!(host = %self.hostname, error = %e, "TLS handshake failed");
            NetError::SslHandshakeFailed(e.to_string())
        })
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").field("hostname", &self.hostname).finish_non_exhaustive()
    }
}

/// Wire code of a version string such as `"TLSv1.3"`; 0 if unrecognised.
pub fn version_code(version: &str) -> u16 {
    match version {
        "TLSv1" => 0x0301,
        "TLSv1.1" => 0x0302,
        "TLSv1.2" => 0x0303,
        "TLSv1.3" => 0x0304,
        _ => 0,
    }
}

/// Negotiated parameters of an established TLS connection.
pub fn connection_state(ssl: &SslRef) -> TlsConnectionState {
    TlsConnectionState {
        version: version_code(ssl.version_str()),
        alpn_protocol: ssl
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default(),
        cipher_suite: ssl.current_cipher().map(|c| c.name().to_string()).unwrap_or_default(),
        server_name: ssl.servername(NameType::HOST_NAME).unwrap_or_default().to_string(),
    }
}
