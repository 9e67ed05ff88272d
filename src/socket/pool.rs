//! HTTP/2 connection pool for a single DoH endpoint.
//!
//! Every connection goes to the same logical server, so the pool is one
//! group: any open connection can carry any request. A request first looks
//! for an open connection; only when none exists does it take the connect
//! lock and run a [`ConnectJob`], so concurrent cold requests end up sharing
//! the one connection that gets established.
//!
//! A request stays in flight until its response body ends or is dropped.
//! Connections with no request in flight for longer than the idle timeout
//! are closed by a background reaper. The reaper holds only a weak
//! reference, so it never keeps a dropped pool alive.

use crate::base::cancel::RequestContext;
use crate::base::neterror::NetError;
use crate::http::h2settings::H2Settings;
use crate::http::responsebody::ResponseBody;
use crate::http::roundtrip::{Performing, RequestBody, RoundTrip};
use crate::socket::connectjob::ConnectJob;
use crate::socket::parallel::ParallelDialer;
use crate::socket::tls::TlsConnector;
use crate::trace::{ClientTrace, GotConnInfo, TraceHook};
use http::header::HOST;
use http::uri::{Authority, PathAndQuery, Uri};
use http::{Request, Response, Version};
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// Pool tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub h2: H2Settings,
    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,
    /// How often the reaper runs; zero disables it.
    pub reap_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            h2: H2Settings::doh(),
            idle_timeout: Duration::from_secs(90),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Per-connection bookkeeping shared with in-flight requests.
#[derive(Debug)]
struct ConnState {
    in_flight: AtomicUsize,
    /// Milliseconds since the pool epoch when the last request finished.
    idle_since_ms: AtomicU64,
    closed: AtomicBool,
}

struct PooledConnection {
    id: u64,
    sender: http2::SendRequest<RequestBody>,
    remote_addr: Option<SocketAddr>,
    state: Arc<ConnState>,
    driver: AbortHandle,
}

impl PooledConnection {
    fn is_open(&self) -> bool {
        !self.state.closed.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    fn is_idle(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire) == 0
    }

    fn idle_time(&self, now_ms: u64) -> Duration {
        if !self.is_idle() {
            return Duration::ZERO;
        }
        let since = self.state.idle_since_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms.saturating_sub(since))
    }

    fn shutdown(self) {
        tracing::debug!(conn = self.id, "closing pooled connection");
        self.state.closed.store(true, Ordering::Release);
        self.driver.abort();
    }
}

/// Marks a connection busy until dropped.
struct InFlight {
    state: Arc<ConnState>,
    epoch: Instant,
}

impl InFlight {
    fn new(state: Arc<ConnState>, epoch: Instant) -> Self {
        state.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { state, epoch }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.state.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.idle_since_ms.store(millis_since(self.epoch), Ordering::Release);
        }
    }
}

fn millis_since(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
}

struct Checkout {
    sender: http2::SendRequest<RequestBody>,
    guard: InFlight,
    info: GotConnInfo,
}

struct PoolShared {
    addrs: Vec<String>,
    dialer: ParallelDialer,
    tls: TlsConnector,
    options: PoolOptions,
    epoch: Instant,
    conns: Mutex<Vec<PooledConnection>>,
    connect_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    closed: AtomicBool,
    reaper: Mutex<Option<AbortHandle>>,
}

impl PoolShared {
    fn conns(&self) -> MutexGuard<'_, Vec<PooledConnection>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop closed and idle-expired connections.
    fn prune(conns: &mut Vec<PooledConnection>, now_ms: u64, idle_timeout: Duration) {
        let mut i = 0;
        while i < conns.len() {
            let conn = &conns[i];
            if !conn.is_open() || (conn.is_idle() && conn.idle_time(now_ms) >= idle_timeout) {
                conns.swap_remove(i).shutdown();
            } else {
                i += 1;
            }
        }
    }

    fn checkout_open(&self) -> Option<Checkout> {
        let now_ms = millis_since(self.epoch);
        let mut conns = self.conns();
        Self::prune(&mut conns, now_ms, self.options.idle_timeout);

        let conn = conns.first()?;
        let info = GotConnInfo {
            remote_addr: conn.remote_addr,
            reused: true,
            was_idle: conn.is_idle(),
            idle_time: conn.idle_time(now_ms),
        };
        Some(Checkout {
            sender: conn.sender.clone(),
            guard: InFlight::new(conn.state.clone(), self.epoch),
            info,
        })
    }

    async fn connect(
        &self,
        ctx: &RequestContext,
        trace: Option<&dyn ClientTrace>,
    ) -> Result<Checkout, NetError> {
        let job = ConnectJob { dialer: &self.dialer, tls: &self.tls, addrs: &self.addrs };
        let established = job.connect(ctx, trace).await?;

        let mut builder = http2::Builder::new(TokioExecutor::new());
        self.options.h2.apply(&mut builder);
        let (sender, conn) =
            builder.handshake(TokioIo::new(established.stream)).await.map_err(NetError::http2)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ConnState {
            in_flight: AtomicUsize::new(0),
            idle_since_ms: AtomicU64::new(millis_since(self.epoch)),
            closed: AtomicBool::new(false),
        });
        let driver_state = state.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(conn = id, error = %e, "h2 connection failed");
            }
            driver_state.closed.store(true, Ordering::Release);
        })
        .abort_handle();

        let pooled = PooledConnection {
            id,
            sender: sender.clone(),
            remote_addr: established.remote_addr,
            state: state.clone(),
            driver,
        };
        let mut conns = self.conns();
        if self.closed.load(Ordering::Acquire) {
            drop(conns);
            pooled.shutdown();
            return Err(NetError::TransportClosed);
        }
        conns.push(pooled);
        drop(conns);

        tracing::debug!(conn = id, candidate = %established.candidate, "pooled new connection");
        Ok(Checkout {
            sender,
            guard: InFlight::new(state, self.epoch),
            info: GotConnInfo {
                remote_addr: established.remote_addr,
                reused: false,
                was_idle: false,
                idle_time: Duration::ZERO,
            },
        })
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        req: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::TransportClosed);
        }
        let hook = TraceHook::from_request(&req);
        let trace = hook.as_ref().map(|h| h.trace());
        let req = prepare(req)?;

        let checkout = match self.checkout_open() {
            Some(checkout) => checkout,
            None => {
                let _connecting = self.connect_lock.lock().await;
                match self.checkout_open() {
                    Some(checkout) => checkout,
                    None => self.connect(ctx, trace).await?,
                }
            }
        };
        if let Some(t) = trace {
            t.got_conn(&checkout.info);
        }

        let Checkout { mut sender, guard, .. } = checkout;
        sender.ready().await.map_err(NetError::http2)?;
        let response = sender.send_request(req).await.map_err(NetError::http2)?;
        Ok(response.map(|body| ResponseBody::new(body).with_in_flight(guard)))
    }

    fn close_idle(&self) {
        let mut conns = self.conns();
        let mut i = 0;
        while i < conns.len() {
            if conns[i].is_idle() || !conns[i].is_open() {
                conns.swap_remove(i).shutdown();
            } else {
                i += 1;
            }
        }
    }

    fn stop_reaper(&self) {
        if let Some(reaper) = self.reaper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            reaper.abort();
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.stop_reaper();
        let conns = std::mem::take(self.conns.get_mut().unwrap_or_else(PoisonError::into_inner));
        release(conns);
    }
}

/// Shut down idle connections. Busy ones are only forgotten: their driver
/// runs until the last response body is done with it.
fn release(conns: Vec<PooledConnection>) {
    for conn in conns {
        if conn.is_idle() {
            conn.shutdown();
        } else {
            tracing::debug!(conn = conn.id, "leaving busy connection to drain");
        }
    }
}

/// Rewrite a request for HTTP/2: the `Host` header becomes `:authority`.
fn prepare(mut req: Request<RequestBody>) -> Result<Request<RequestBody>, NetError> {
    let host = req.headers_mut().remove(HOST);
    let mut parts = req.uri().clone().into_parts();
    if parts.scheme.is_none() {
        return Err(NetError::InvalidUrl);
    }
    if let Some(host) = host {
        let authority = host
            .to_str()
            .ok()
            .and_then(|h| h.parse::<Authority>().ok())
            .ok_or(NetError::InvalidUrl)?;
        parts.authority = Some(authority);
    }
    if parts.authority.is_none() {
        return Err(NetError::InvalidUrl);
    }
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    *req.uri_mut() = Uri::from_parts(parts).map_err(|_| NetError::InvalidUrl)?;
    *req.version_mut() = Version::HTTP_2;
    Ok(req)
}

/// Pool of HTTP/2 connections to one endpoint.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create a pool dialing `addrs`. The idle reaper starts only when
    /// called inside a Tokio runtime.
    pub fn new(
        addrs: Vec<String>,
        dialer: ParallelDialer,
        tls: TlsConnector,
        options: PoolOptions,
    ) -> Self {
        let reap_interval = options.reap_interval;
        let pool = Self {
            shared: Arc::new(PoolShared {
                addrs,
                dialer,
                tls,
                options,
                epoch: Instant::now(),
                conns: Mutex::new(Vec::new()),
                connect_lock: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                reaper: Mutex::new(None),
            }),
        };
        if !reap_interval.is_zero() {
            pool.start_reaper(reap_interval);
        }
        pool
    }

    fn start_reaper(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime; idle reaper disabled");
            return;
        };
        let weak = Arc::downgrade(&self.shared);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                let now_ms = millis_since(shared.epoch);
                PoolShared::prune(&mut shared.conns(), now_ms, shared.options.idle_timeout);
            }
        });
        *self.shared.reaper.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(task.abort_handle());
    }

    pub fn addrs(&self) -> &[String] {
        &self.shared.addrs
    }

    /// Number of open pooled connections.
    pub fn connection_count(&self) -> usize {
        self.shared.conns().iter().filter(|c| c.is_open()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close every connection with no request in flight.
    pub fn close_idle_connections(&self) {
        self.shared.close_idle();
    }

    /// Stop accepting requests and release all connections.
    ///
    /// Requests already in flight finish on their connection, response
    /// bodies included; new ones fail with [`NetError::TransportClosed`].
    /// Calling this again has no effect.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.stop_reaper();
        let conns = std::mem::take(&mut *self.shared.conns());
        tracing::debug!(connections = conns.len(), "closing connection pool");
        release(conns);
    }
}

impl RoundTrip for ConnectionPool {
    fn perform(&self, req: Request<RequestBody>) -> Performing {
        let shared = self.shared.clone();
        Box::pin(async move {
            let ctx = RequestContext::from_request(&req);
            ctx.run(shared.send(&ctx, req)).await
        })
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addrs", &self.shared.addrs)
            .field("connections", &self.connection_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::parallel::{Connecting, TcpConnect};
    use crate::socket::tls::{TlsConfig, TrustAnchors};
    use crate::trace::ConnectInfoRecorder;

    struct Refused(AtomicUsize);

    impl TcpConnect for Refused {
        fn connect(&self, _addr: &str) -> Connecting {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(NetError::ConnectionTimedOut) })
        }
    }

    fn refused_pool() -> (ConnectionPool, Arc<Refused>) {
        let connector = Arc::new(Refused(AtomicUsize::new(0)));
        let tls =
            TlsConnector::new("dns.example.com", &TrustAnchors::default(), &TlsConfig::default())
                .unwrap();
        let pool = ConnectionPool::new(
            vec!["192.0.2.1:443".into(), "192.0.2.2:443".into()],
            ParallelDialer::new(connector.clone()),
            tls,
            PoolOptions::default(),
        );
        (pool, connector)
    }

    fn doh_request() -> Request<RequestBody> {
        Request::builder()
            .uri("https://192.0.2.1:443/dns-query?dns=AAAB")
            .header(HOST, "dns.example.com")
            .body(RequestBody::default())
            .unwrap()
    }

    #[test]
    fn test_prepare_moves_host_to_authority() {
        let req = prepare(doh_request()).unwrap();
        assert_eq!(req.uri().to_string(), "https://dns.example.com/dns-query?dns=AAAB");
        assert!(req.headers().get(HOST).is_none());
        assert_eq!(req.version(), Version::HTTP_2);
    }

    #[test]
    fn test_prepare_without_host_keeps_uri() {
        let req = Request::builder()
            .uri("https://1.1.1.1:443/dns-query")
            .body(RequestBody::default())
            .unwrap();
        let req = prepare(req).unwrap();
        assert_eq!(req.uri().authority().unwrap().as_str(), "1.1.1.1:443");
    }

    #[test]
    fn test_prepare_rejects_relative_uri() {
        let req = Request::builder().uri("/dns-query").body(RequestBody::default()).unwrap();
        assert!(matches!(prepare(req), Err(NetError::InvalidUrl)));
    }

    #[tokio::test]
    async fn test_dial_failure_surfaces_and_pools_nothing() {
        let (pool, connector) = refused_pool();
        let mut req = doh_request();
        let recorder = ConnectInfoRecorder::attach(&mut req);

        let err = pool.perform(req).await.unwrap_err();
        assert!(matches!(err, NetError::AllAttemptsFailed(ref e) if e.len() == 2));
        assert_eq!(connector.0.load(Ordering::SeqCst), 2);
        assert_eq!(pool.connection_count(), 0);
        assert!(!recorder.snapshot().is_fresh_connection());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_requests() {
        let (pool, connector) = refused_pool();
        pool.close();
        pool.close();
        assert!(pool.is_closed());

        let err = pool.perform(doh_request()).await.unwrap_err();
        assert!(matches!(err, NetError::TransportClosed));
        assert_eq!(connector.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let (pool, connector) = refused_pool();
        let (ctx, cancel) = RequestContext::with_cancel();
        cancel.cancel();
        let mut req = doh_request();
        ctx.attach(&mut req);

        let err = pool.perform(req).await.unwrap_err();
        assert!(matches!(err, NetError::Cancelled));
        assert_eq!(connector.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pool_outside_runtime_has_no_reaper() {
        let (pool, _) = refused_pool();
        assert!(pool.shared.reaper.lock().unwrap().is_none());
        pool.close_idle_connections();
        assert_eq!(pool.connection_count(), 0);
    }
}
