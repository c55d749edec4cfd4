//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup; a
/// second call fails because a global recorder is already set.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused by the authenticator (counter, labels: error).
pub const WS_AUTH_FAILURES_TOTAL: &str = "ws_auth_failures_total";
/// Broadcasts issued (counter, labels: scope).
pub const WS_BROADCAST_TOTAL: &str = "ws_broadcast_total";
/// Per-connection broadcast writes that failed (counter).
pub const WS_BROADCAST_FAILURES_TOTAL: &str = "ws_broadcast_failures_total";
/// Connections dropped for missing their read deadline (counter).
pub const WS_KEEPALIVE_TIMEOUTS_TOTAL: &str = "ws_keepalive_timeouts_total";
/// Inbound frames that failed to decode (counter).
pub const WS_DECODE_ERRORS_TOTAL: &str = "ws_decode_errors_total";
