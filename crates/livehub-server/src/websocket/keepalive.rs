//! Server-initiated ping/pong liveness monitoring.
//!
//! `Alive --ping sent--> AwaitingPong --any inbound frame--> Alive`, and
//! `AwaitingPong --read deadline elapsed--> TimedOut`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::{ClientConnection, OutboundFrame, SendError};

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveOutcome {
    /// Nothing arrived before the read deadline.
    TimedOut,
    /// The connection's writer is gone.
    Closed,
    /// The monitor was cancelled externally.
    Cancelled,
}

/// Ping `connection` every `interval` until its read deadline elapses or
/// `cancel` fires.
///
/// The first ping goes out one full interval after start. A ping that finds
/// the outbound queue full is skipped; the deadline still applies.
pub async fn run_keepalive(
    connection: Arc<ClientConnection>,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepaliveOutcome {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if Instant::now() >= connection.read_deadline() {
                    return KeepaliveOutcome::TimedOut;
                }
                match connection.try_send(OutboundFrame::Ping) {
                    Ok(()) => connection.mark_ping_sent(),
                    Err(SendError::Full) => {
                        debug!(conn_id = %connection.id, "outbound queue full, skipping ping");
                    }
                    Err(_) => return KeepaliveOutcome::Closed,
                }
            }
            () = cancel.cancelled() => {
                return KeepaliveOutcome::Cancelled;
            }
        }
    }
}
