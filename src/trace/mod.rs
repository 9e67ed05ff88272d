//! Connection tracing.
//!
//! A [`ClientTrace`] travels with a request (in its extensions, wrapped in a
//! [`TraceHook`]) and is notified as the connection pool establishes or
//! reuses a connection for it. For a freshly dialed connection the hooks
//! fire in this order:
//!
//! 1. `connect_start` / `connect_done` around the parallel TCP dial
//! 2. `tls_handshake_start` / `tls_handshake_done` around the TLS handshake
//! 3. `got_conn` once the connection is ready for the request
//!
//! A request served by a pooled connection only sees `got_conn` with
//! `reused == true`.
//!
//! [`ConnectInfoRecorder`] is the standard trace: it fills a [`ConnectInfo`]
//! record. Recording never fails; every error is kept as text.

pub mod tracer;

pub use tracer::{ConnectTracer, OnConnect};

use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Status string recorded for a successful phase.
pub const STATUS_OK: &str = "ok";

/// Diagnostic record of one request's connection establishment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub connect_status: String,
    pub server_addr: String,
    pub connect_time: Duration,
    pub protocol: String,
    pub tls_time: Duration,
    pub tls_version: String,
    pub tls_alpn_protocol: String,
    pub tls_cipher_suite_name: String,
    pub tls_sni_ext_addr: String,
    pub tls_handshake_status: String,
}

impl ConnectInfo {
    fn new() -> Self {
        Self { protocol: "TCP".to_string(), ..Default::default() }
    }

    /// True when the request paid for a new TCP connection.
    pub fn is_fresh_connection(&self) -> bool {
        self.connect_status == STATUS_OK
    }
}

/// Negotiated parameters of a completed (or failed) TLS handshake.
///
/// Empty/zero fields mean the value was not negotiated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConnectionState {
    /// Wire version code, e.g. `0x0304` for TLS 1.3.
    pub version: u16,
    pub alpn_protocol: String,
    pub cipher_suite: String,
    pub server_name: String,
}

/// Connection handed to a request by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotConnInfo {
    pub remote_addr: Option<SocketAddr>,
    pub reused: bool,
    pub was_idle: bool,
    pub idle_time: Duration,
}

/// Hooks fired while a request obtains its connection.
///
/// All methods default to no-ops. Implementations must not block.
pub trait ClientTrace: Send + Sync {
    fn connect_start(&self, _addr: &str) {}

    fn connect_done(&self, _addr: &str, _err: Option<&NetError>) {}

    fn tls_handshake_start(&self) {}

    fn tls_handshake_done(&self, _state: &TlsConnectionState, _err: Option<&NetError>) {}

    fn got_conn(&self, _info: &GotConnInfo) {}
}

/// Request extension carrying a [`ClientTrace`].
#[derive(Clone)]
pub struct TraceHook(Arc<dyn ClientTrace>);

impl TraceHook {
    pub fn new(trace: Arc<dyn ClientTrace>) -> Self {
        Self(trace)
    }

    /// Install this hook on `req`, replacing any previous one.
    pub fn attach<B>(self, req: &mut http::Request<B>) {
        req.extensions_mut().insert(self);
    }

    pub fn from_request<B>(req: &http::Request<B>) -> Option<Self> {
        req.extensions().get::<TraceHook>().cloned()
    }

    pub fn trace(&self) -> &dyn ClientTrace {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for TraceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceHook").finish_non_exhaustive()
    }
}

/// Map a TLS wire version to its display name.
pub fn tls_version_name(version: u16) -> &'static str {
    match version {
        0x0301 => "1.0",
        0x0302 => "1.1",
        0x0303 => "1.2",
        0x0304 => "1.3",
        _ => "unknown",
    }
}

#[derive(Debug)]
struct RecorderState {
    info: ConnectInfo,
    connect_start: Option<Instant>,
    tls_start: Option<Instant>,
    sealed: bool,
}

/// [`ClientTrace`] that fills a [`ConnectInfo`].
///
/// Once [`seal`](Self::seal)ed, further hook calls are ignored so the record
/// cannot change after the request that owns it has returned.
#[derive(Debug)]
pub struct ConnectInfoRecorder {
    state: Mutex<RecorderState>,
}

impl Default for ConnectInfoRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectInfoRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RecorderState {
                info: ConnectInfo::new(),
                connect_start: None,
                tls_start: None,
                sealed: false,
            }),
        }
    }

    /// Attach a fresh recorder to `req` and return it.
    pub fn attach<B>(req: &mut http::Request<B>) -> Arc<Self> {
        let recorder = Arc::new(Self::new());
        TraceHook::new(recorder.clone()).attach(req);
        recorder
    }

    pub fn snapshot(&self) -> ConnectInfo {
        self.lock().info.clone()
    }

    /// Stop recording and return the final record.
    pub fn seal(&self) -> ConnectInfo {
        let mut state = self.lock();
        state.sealed = true;
        state.info.clone()
    }

    // A panic in one hook must not disable recording for the rest.
    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut RecorderState)) {
        let mut state = self.lock();
        if !state.sealed {
            f(&mut state);
        }
    }
}

fn status(err: Option<&NetError>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => STATUS_OK.to_string(),
    }
}

fn elapsed(start: Option<Instant>) -> Duration {
    start.map(|s| s.elapsed()).unwrap_or_default()
}

impl ClientTrace for ConnectInfoRecorder {
    fn connect_start(&self, _addr: &str) {
        self.update(|s| s.connect_start = Some(Instant::now()));
    }

    fn connect_done(&self, addr: &str, err: Option<&NetError>) {
        self.update(|s| {
            if err.is_none() {
                s.info.server_addr = addr.to_string();
            }
            s.info.connect_status = status(err);
            s.info.connect_time = elapsed(s.connect_start);
        });
    }

    fn tls_handshake_start(&self) {
        self.update(|s| s.tls_start = Some(Instant::now()));
    }

    fn tls_handshake_done(&self, state: &TlsConnectionState, err: Option<&NetError>) {
        self.update(|s| {
            s.info.tls_handshake_status = status(err);
            s.info.tls_time = elapsed(s.tls_start);
            s.info.tls_version = tls_version_name(state.version).to_string();
            s.info.tls_alpn_protocol = state.alpn_protocol.clone();
            s.info.tls_cipher_suite_name = state.cipher_suite.clone();
            s.info.tls_sni_ext_addr = state.server_name.clone();
        });
    }

    fn got_conn(&self, info: &GotConnInfo) {
        if let Some(addr) = info.remote_addr {
            self.update(|s| s.info.server_addr = addr.to_string());
        }
    }
}
