use crate::endpoint::DEFAULT_PORT;
use crate::http::h2settings::H2Settings;
use crate::socket::pool::PoolOptions;
use crate::socket::tls::TlsConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every transport a factory builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Port joined to every candidate address.
    pub port: u16,
    /// Per-attempt TCP connect timeout. `None` leaves it to the OS and the
    /// request context.
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub tls: TlsConfig,
    pub h2: H2Settings,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: None,
            idle_timeout: Duration::from_secs(90),
            reap_interval: Duration::from_secs(30),
            tls: TlsConfig::default_doh(),
            h2: H2Settings::doh(),
        }
    }
}

impl TransportConfig {
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    pub(crate) fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            h2: self.h2,
            idle_timeout: self.idle_timeout,
            reap_interval: self.reap_interval,
        }
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Close pooled connections idle for longer than `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// How often idle connections are checked. Zero disables the reaper.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval = interval;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn session_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.tls.session_cache_capacity = capacity;
        self
    }

    pub fn h2(mut self, h2: H2Settings) -> Self {
        self.config.h2 = h2;
        self
    }

    pub fn build(self) -> TransportConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.port, 443);
        assert!(config.connect_timeout.is_none());
        assert_eq!(config.tls.alpn_protos, vec!["h2".to_string()]);
        assert_eq!(config.tls.session_cache_capacity, 64);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TransportConfig::builder()
            .port(8443)
            .connect_timeout(Duration::from_secs(2))
            .idle_timeout(Duration::from_secs(5))
            .reap_interval(Duration::ZERO)
            .session_cache_capacity(8)
            .build();
        assert_eq!(config.port, 8443);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.tls.session_cache_capacity, 8);

        let pool = config.pool_options();
        assert_eq!(pool.idle_timeout, Duration::from_secs(5));
        assert!(pool.reap_interval.is_zero());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: TransportConfig = serde_json::from_str(r#"{"port": 8443}"#).unwrap();
        assert_eq!(config.port, 8443);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.h2, H2Settings::doh());
    }
}
