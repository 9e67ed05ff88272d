use super::config::TransportConfig;
use super::Transport;
use crate::base::neterror::NetError;
use crate::dns::{GaiResolver, Resolve};
use crate::endpoint::Endpoint;
use crate::http::rewrite::{RequestRewriter, RewriteTarget};
use crate::http::roundtrip::RoundTrip;
use crate::socket::parallel::{ParallelDialer, TcpConnect, TcpConnector};
use crate::socket::pool::ConnectionPool;
use crate::socket::tls::{TlsConnector, TrustAnchors};
use crate::trace::ConnectTracer;
use std::sync::Arc;

/// Builds [`Transport`]s for DoH endpoints.
///
/// The factory holds what every transport shares: the trust anchors, the
/// configuration and the TCP connect seam. Each built transport gets its own
/// TLS connector, session cache and connection pool.
#[derive(Clone)]
pub struct TransportFactory {
    anchors: TrustAnchors,
    config: TransportConfig,
    resolver: Arc<dyn Resolve>,
    connector: Option<Arc<dyn TcpConnect>>,
}

impl TransportFactory {
    /// Factory trusting only `anchors`.
    pub fn new(anchors: TrustAnchors) -> Self {
        Self {
            anchors,
            config: TransportConfig::default(),
            resolver: Arc::new(GaiResolver::new()),
            connector: None,
        }
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver for candidates that are hostnames.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace raw TCP connects; the resolver is then unused.
    pub fn with_connector(mut self, connector: Arc<dyn TcpConnect>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Addresses a transport for `endpoint` will dial.
    pub fn candidate_addrs(&self, endpoint: &Endpoint) -> Vec<String> {
        endpoint.candidate_addrs(self.config.port)
    }

    fn tcp_connector(&self) -> Arc<dyn TcpConnect> {
        match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(
                TcpConnector::new(self.resolver.clone())
                    .with_connect_timeout(self.config.connect_timeout),
            ),
        }
    }

    /// Build a pooled HTTP/2 transport for `endpoint`.
    ///
    /// Requests sent through it are always delivered to one of the
    /// endpoint's candidate addresses, whatever their URI says, over TLS
    /// verified against the endpoint hostname.
    pub fn build_transport(&self, endpoint: &Endpoint) -> Result<Transport, NetError> {
        if endpoint.hostname().is_empty() {
            return Err(NetError::InvalidUrl);
        }
        let addrs = self.candidate_addrs(endpoint);
        let tls = TlsConnector::new(endpoint.hostname(), &self.anchors, &self.config.tls)?;
        let pool = ConnectionPool::new(
            addrs,
            ParallelDialer::new(self.tcp_connector()),
            tls,
            self.config.pool_options(),
        );

        let chain: Box<dyn RoundTrip> = match endpoint.connect_callback() {
            Some(on_connect) => Box::new(ConnectTracer::new(pool.clone(), on_connect.clone())),
            None => Box::new(pool.clone()),
        };
        tracing::debug!(
            host = %endpoint.hostname(),
            candidates = ?pool.addrs(),
            traced = endpoint.connect_callback().is_some(),
            "built transport"
        );
        Ok(Transport::new(chain, pool))
    }

    /// Build the full chain for `endpoint`: requests are rewritten to the
    /// first candidate address, the endpoint hostname and its path.
    pub fn build_endpoint_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<RequestRewriter<Transport>, NetError> {
        let transport = self.build_transport(endpoint)?;
        let addr = transport.addrs().first().cloned().ok_or(NetError::NoCandidateAddresses)?;
        let mut target = RewriteTarget::new(endpoint.hostname(), addr);
        if let Some(path) = endpoint.request_path() {
            target = target.with_path(path);
        }
        RequestRewriter::new(transport, target)
    }
}

impl std::fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFactory")
            .field("anchors", &self.anchors)
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Name, Resolving};
    use crate::socket::parallel::Connecting;
    use crate::trace::ConnectInfo;
    use http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Refused(Mutex<Vec<String>>);

    impl TcpConnect for Refused {
        fn connect(&self, addr: &str) -> Connecting {
            self.0.lock().unwrap().push(addr.to_string());
            Box::pin(async { Err(NetError::ConnectionTimedOut) })
        }
    }

    fn factory(connector: Arc<Refused>) -> TransportFactory {
        TransportFactory::new(TrustAnchors::default()).with_connector(connector)
    }

    #[test]
    fn test_candidates_use_configured_port() {
        let factory = TransportFactory::new(TrustAnchors::default())
            .with_config(TransportConfig::builder().port(8443).build());
        let endpoint = Endpoint::new("dns.example.com").bootstrap(["192.0.2.1"]);
        assert_eq!(factory.candidate_addrs(&endpoint), vec!["192.0.2.1:8443"]);
    }

    #[test]
    fn test_empty_hostname_rejected() {
        let factory = TransportFactory::new(TrustAnchors::default());
        assert!(matches!(factory.build_transport(&Endpoint::new("")), Err(NetError::InvalidUrl)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_never_reports() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let endpoint = Endpoint::new("cloudflare-dns.com")
            .bootstrap(["1.1.1.1", "1.0.0.1"])
            .on_connect(Arc::new(move |_: &ConnectInfo| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        let connector = Arc::new(Refused::default());
        let transport = factory(connector.clone()).build_transport(&endpoint).unwrap();

        let req = Request::builder()
            .uri("https://1.1.1.1:443/dns-query")
            .body(Default::default())
            .unwrap();
        let err = transport.perform(req).await.unwrap_err();

        assert!(matches!(err, NetError::AllAttemptsFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let mut dialed = connector.0.lock().unwrap().clone();
        dialed.sort();
        assert_eq!(dialed, vec!["1.0.0.1:443", "1.1.1.1:443"]);
    }

    #[tokio::test]
    async fn test_endpoint_transport_targets_first_candidate() {
        let endpoint = Endpoint::new("cloudflare-dns.com")
            .bootstrap(["1.1.1.1", "1.0.0.1"])
            .path("/dns-query");
        let rewriter = factory(Arc::default()).build_endpoint_transport(&endpoint).unwrap();

        let target = rewriter.target();
        assert_eq!(target.addr, "1.1.1.1:443");
        assert_eq!(target.hostname, "cloudflare-dns.com");
        assert_eq!(target.path.as_deref(), Some("/dns-query"));
        assert_eq!(rewriter.inner().addrs().len(), 2);
    }

    struct Unresolvable(Mutex<Vec<String>>);

    impl Resolve for Unresolvable {
        fn resolve(&self, name: Name) -> Resolving {
            self.0.lock().unwrap().push(name.to_string());
            Box::pin(async { Err(NetError::NameNotResolved) })
        }
    }

    #[tokio::test]
    async fn test_hostname_candidate_uses_configured_resolver() {
        let resolver = Arc::new(Unresolvable(Mutex::new(Vec::new())));
        let transport = TransportFactory::new(TrustAnchors::default())
            .with_resolver(resolver.clone())
            .build_transport(&Endpoint::new("dns.example.com"))
            .unwrap();

        let req = Request::builder()
            .uri("https://dns.example.com/dns-query")
            .body(Default::default())
            .unwrap();
        let err = transport.perform(req).await.unwrap_err();

        let NetError::AllAttemptsFailed(errors) = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(errors.failures()[0].addr, "dns.example.com:443");
        assert!(matches!(errors.failures()[0].error, NetError::NameNotResolved));
        assert_eq!(*resolver.0.lock().unwrap(), vec!["dns.example.com"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = factory(Arc::default())
            .build_transport(&Endpoint::new("dns.example.com"))
            .unwrap();
        transport.close();
        transport.close();
        assert!(transport.is_closed());

        let req = Request::builder()
            .uri("https://dns.example.com/dns-query")
            .body(Default::default())
            .unwrap();
        assert!(matches!(transport.perform(req).await, Err(NetError::TransportClosed)));
    }
}
