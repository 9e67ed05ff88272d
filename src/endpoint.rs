//! DoH endpoint description.

use crate::trace::OnConnect;
use std::net::IpAddr;
use std::sync::Arc;

/// Port every DoH endpoint is reached on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 443;

/// A DNS-over-HTTPS server.
///
/// `hostname` is the logical name used for SNI, certificate verification
/// and the `Host` header. When `bootstrap` is non-empty its addresses are
/// dialed directly and `hostname` is never resolved.
#[derive(Clone, Default)]
pub struct Endpoint {
    hostname: String,
    bootstrap: Vec<String>,
    path: Option<String>,
    on_connect: Option<Arc<dyn OnConnect>>,
}

impl Endpoint {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self { hostname: hostname.into(), ..Default::default() }
    }

    /// Set bootstrap IP addresses, given without a port.
    pub fn bootstrap<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the request path, e.g. `/dns-query`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.is_empty() { None } else { Some(path) };
        self
    }

    /// Report every new connection to `on_connect`.
    pub fn on_connect(mut self, on_connect: Arc<dyn OnConnect>) -> Self {
        self.on_connect = Some(on_connect);
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn bootstrap_addrs(&self) -> &[String] {
        &self.bootstrap
    }

    pub fn request_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn connect_callback(&self) -> Option<&Arc<dyn OnConnect>> {
        self.on_connect.as_ref()
    }

    /// Addresses to dial: every bootstrap address, or the hostname itself.
    pub fn candidate_addrs(&self, port: u16) -> Vec<String> {
        if self.bootstrap.is_empty() {
            return vec![join_host_port(&self.hostname, port)];
        }
        self.bootstrap.iter().map(|ip| join_host_port(ip, port)).collect()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("hostname", &self.hostname)
            .field("bootstrap", &self.bootstrap)
            .field("path", &self.path)
            .field("on_connect", &self.on_connect.is_some())
            .finish()
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{bare}]:{port}"),
        _ => format!("{host}:{port}"),
    }
}
