//! Registration and the single teardown path.
//!
//! Every way a connection can end (client close, protocol error, keepalive
//! timeout, failed broadcast write, server shutdown) funnels into
//! [`teardown`]. Only the call that actually removes the connection records
//! the disconnect, so racing triggers are harmless.

use std::sync::Arc;

use livehub_core::ConnectionId;
use metrics::{counter, gauge, histogram};
use tracing::{info, warn};

use super::connection::ClientConnection;
use crate::errors::RegistryError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_KEEPALIVE_TIMEOUTS_TOTAL,
};
use crate::registry::HubRegistry;

/// Why a connection was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a close frame or the stream ended.
    ClientClosed,
    /// A read failed or the peer broke the protocol.
    ReadError,
    /// Nothing arrived before the read deadline.
    KeepaliveTimeout,
    /// A write to the peer failed or timed out.
    WriteFailed,
    /// The server is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Metric label and log value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReadError => "read_error",
            Self::KeepaliveTimeout => "keepalive_timeout",
            Self::WriteFailed => "write_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Register `conn` in both registries and record the connect.
///
/// A refused registration records nothing; the caller still owns `conn`.
pub fn admit(
    registry: &HubRegistry,
    conn: Arc<ClientConnection>,
) -> Result<ConnectionId, RegistryError> {
    let remote_addr = conn.remote_addr;
    let principal = conn.principal.to_string();
    let id = registry.register(conn).inspect_err(|e| {
        warn!(error = %e, ?remote_addr, "registration refused");
    })?;
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(conn_id = %id, ?remote_addr, principal, "client connected");
    Ok(id)
}

/// Remove `id` from both registries and close its socket.
///
/// Returns `false` when the connection was already gone.
pub fn teardown(registry: &HubRegistry, id: &ConnectionId, reason: DisconnectReason) -> bool {
    let Some(conn) = registry.unregister(id) else {
        return false;
    };
    conn.close();

    let duration = conn.age();
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(duration.as_secs_f64());
    if reason == DisconnectReason::KeepaliveTimeout {
        counter!(WS_KEEPALIVE_TIMEOUTS_TOTAL).increment(1);
    }
    info!(
        conn_id = %id,
        reason = reason.as_str(),
        duration_secs = duration.as_secs(),
        "client disconnected"
    );
    true
}
