//! HTTP/2 connection settings.
//!
//! DoH exchanges are tiny request/response pairs multiplexed over one long
//! lived connection, so the defaults keep the RFC flow-control windows and
//! only tune liveness.

use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP/2 settings applied to every pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct H2Settings {
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4) - per-stream flow control window
    pub initial_stream_window_size: u32,
    /// Connection-level flow control window
    pub initial_connection_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5) - Maximum frame payload
    pub max_frame_size: u32,
    /// Interval between PING frames; `None` disables keep-alive pings.
    pub keep_alive_interval: Option<Duration>,
    /// How long to wait for a PING acknowledgement before closing.
    pub keep_alive_timeout: Duration,
    /// Keep pinging while no stream is open.
    pub keep_alive_while_idle: bool,
}

impl Default for H2Settings {
    fn default() -> Self {
        Self::doh()
    }
}

impl H2Settings {
    pub fn doh() -> Self {
        Self {
            initial_stream_window_size: 65535, // RFC default 64KB
            initial_connection_window_size: 65535,
            max_frame_size: 16384, // 16KB - RFC default
            keep_alive_interval: None,
            keep_alive_timeout: Duration::from_secs(20),
            keep_alive_while_idle: false,
        }
    }

    /// Apply to a hyper HTTP/2 client builder.
    pub fn apply(&self, builder: &mut http2::Builder<TokioExecutor>) {
        builder
            .timer(TokioTimer::new())
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_frame_size(self.max_frame_size)
            .keep_alive_interval(self.keep_alive_interval)
            .keep_alive_timeout(self.keep_alive_timeout)
            .keep_alive_while_idle(self.keep_alive_while_idle);
    }
}
