//! Runtime server configuration.

use std::time::Duration;

use livehub_core::constants::{
    DEFAULT_PING_INTERVAL_SECS, DEFAULT_PONG_WAIT_SECS, DEFAULT_WRITE_TIMEOUT_SECS,
};
use livehub_settings::HubSettings;

/// Configuration for the livehub server, with timings resolved to
/// [`Duration`]s.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Path of the WebSocket upgrade route.
    pub ws_path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Read deadline extension granted by each inbound frame.
    pub pong_wait: Duration,
    /// Bound on a single outbound write.
    pub write_timeout: Duration,
    /// Period of the `system_health` feed, if enabled.
    pub health_interval: Option<Duration>,
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            max_connections: 10_000,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            health_interval: None,
        }
    }
}

impl From<&HubSettings> for ServerConfig {
    fn from(settings: &HubSettings) -> Self {
        let health_secs = settings.broadcast.health_interval_secs;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ws_path: settings.server.path.clone(),
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            outbound_queue: settings.server.outbound_queue,
            ping_interval: Duration::from_secs(settings.keepalive.ping_interval_secs),
            pong_wait: Duration::from_secs(settings.keepalive.pong_wait_secs),
            write_timeout: Duration::from_secs(settings.broadcast.write_timeout_secs),
            health_interval: (health_secs > 0).then(|| Duration::from_secs(health_secs)),
        }
    }
}
