//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a settings file only has to name
//! the keys it changes.

use livehub_core::constants::{
    DEFAULT_PING_INTERVAL_SECS, DEFAULT_PONG_WAIT_SECS, DEFAULT_WRITE_TIMEOUT_SECS,
};
use livehub_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Ping/pong timing.
    pub keepalive: KeepaliveSettings,
    /// Outbound write bounds and the health feed.
    pub broadcast: BroadcastSettings,
    /// Upgrade-time credential checks.
    pub auth: AuthSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.keepalive.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "keepalive.pingIntervalSecs must be greater than zero".into(),
            ));
        }
        if self.keepalive.pong_wait_secs <= self.keepalive.ping_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "keepalive.pongWaitSecs ({}) must exceed keepalive.pingIntervalSecs ({})",
                self.keepalive.pong_wait_secs, self.keepalive.ping_interval_secs
            )));
        }
        if self.broadcast.write_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "broadcast.writeTimeoutSecs must be greater than zero".into(),
            ));
        }
        if self.server.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueue must be greater than zero".into(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        if let Some(entry) = self.auth.tokens.iter().find(|t| t.token.is_empty()) {
            return Err(SettingsError::InvalidValue(format!(
                "auth token for subject '{}' is empty",
                entry.subject
            )));
        }
        Ok(())
    }
}

/// Listener and connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path of the upgrade endpoint.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            path: "/ws".to_string(),
            max_connections: 10_000,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
        }
    }
}

/// Ping/pong timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepaliveSettings {
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Seconds of silence after which a connection is dropped.
    pub pong_wait_secs: u64,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            pong_wait_secs: DEFAULT_PONG_WAIT_SECS,
        }
    }
}

/// Outbound write bounds and the health feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Upper bound on a single outbound write, in seconds.
    pub write_timeout_secs: u64,
    /// Period of the built-in `system_health` feed; `0` disables it.
    pub health_interval_secs: u64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            health_interval_secs: 0,
        }
    }
}

/// A bearer token and the principal it authenticates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Principal name recorded on the connection.
    pub subject: String,
    /// The secret the client presents.
    pub token: String,
}

/// Upgrade-time credential checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Admit clients that present no token at all.
    pub allow_anonymous: bool,
    /// Accepted bearer tokens.
    pub tokens: Vec<TokenEntry>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            tokens: Vec::new(),
        }
    }
}

/// Log level and format.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Compact text or JSON lines.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
