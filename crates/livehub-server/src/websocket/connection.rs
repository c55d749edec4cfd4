//! WebSocket client connection state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use livehub_core::{ConnectionId, ServerMessage};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;

/// A frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized JSON text frame.
    Text(Arc<str>),
    /// Protocol-level ping.
    Ping,
}

/// Why a frame could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task has exited.
    #[error("connection closed")]
    Closed,
    /// The queue stayed full for the whole write timeout.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    /// The queue is full and the caller did not wait.
    #[error("outbound queue full")]
    Full,
    /// The message could not be serialized.
    #[error("failed to serialize frame: {0}")]
    Serialize(String),
}

/// Keepalive state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepaliveState {
    /// A frame arrived since the last ping.
    Alive,
    /// A ping was sent and nothing has arrived since.
    AwaitingPong,
}

struct Liveness {
    state: KeepaliveState,
    last_activity: Instant,
    read_deadline: Instant,
}

/// A registered, authenticated client.
///
/// The only route to the socket is the outbound queue drained by the
/// connection's single writer task, so frames leave in the order they were
/// queued.
pub struct ClientConnection {
    /// Unique connection handle.
    pub id: ConnectionId,
    /// Peer address, when known.
    pub remote_addr: Option<SocketAddr>,
    /// Who the authenticator admitted.
    pub principal: Principal,
    /// Wall-clock time of registration.
    pub connected_at: DateTime<Utc>,
    started: Instant,
    pong_wait: Duration,
    liveness: Mutex<Liveness>,
    tx: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Create a connection feeding `tx`, with its first read deadline
    /// `pong_wait` from now.
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        principal: Principal,
        pong_wait: Duration,
        tx: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            principal,
            connected_at: Utc::now(),
            started: now,
            pong_wait,
            liveness: Mutex::new(Liveness {
                state: KeepaliveState::Alive,
                last_activity: now,
                read_deadline: now + pong_wait,
            }),
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a frame, waiting at most `timeout` for queue space.
    pub async fn send_timeout(
        &self,
        frame: OutboundFrame,
        timeout: Duration,
    ) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.send_timeout(frame, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => SendError::Timeout(timeout),
            mpsc::error::SendTimeoutError::Closed(_) => SendError::Closed,
        })
    }

    /// Serialize `message` and queue it.
    pub async fn send_message(
        &self,
        message: &ServerMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        let json = message
            .to_json()
            .map_err(|e| SendError::Serialize(e.to_string()))?;
        self.send_timeout(OutboundFrame::Text(json.into()), timeout)
            .await
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Record inbound activity: back to [`KeepaliveState::Alive`] with the
    /// read deadline pushed `pong_wait` past now.
    pub fn mark_activity(&self) {
        let now = Instant::now();
        let mut liveness = self.liveness.lock();
        liveness.state = KeepaliveState::Alive;
        liveness.last_activity = now;
        liveness.read_deadline = now + self.pong_wait;
    }

    /// Record that a ping was sent.
    pub fn mark_ping_sent(&self) {
        self.liveness.lock().state = KeepaliveState::AwaitingPong;
    }

    /// Current keepalive state.
    pub fn keepalive_state(&self) -> KeepaliveState {
        self.liveness.lock().state
    }

    /// Instant after which the connection counts as dead.
    pub fn read_deadline(&self) -> Instant {
        self.liveness.lock().read_deadline
    }

    /// Time since the last inbound frame (or registration).
    pub fn idle_for(&self) -> Duration {
        self.liveness.lock().last_activity.elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Token cancelled when the connection is closing.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the session to stop. The writer sends a close frame on its way
    /// out.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("principal", &self.principal)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A connection with a 60s pong wait and a 32-slot queue.
    pub(crate) fn connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<OutboundFrame>) {
        connection_with(id, 32, Duration::from_secs(60))
    }

    pub(crate) fn connection_with(
        id: &str,
        queue: usize,
        pong_wait: Duration,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(queue);
        let conn = ClientConnection::new(
            ConnectionId::from(id),
            None,
            Principal::Anonymous,
            pong_wait,
            tx,
        );
        (Arc::new(conn), rx)
    }

    /// Decode the next queued text frame.
    pub(crate) fn next_json(rx: &mut mpsc::Receiver<OutboundFrame>) -> Option<serde_json::Value> {
        loop {
            match rx.try_recv().ok()? {
                OutboundFrame::Text(text) => return serde_json::from_str(&text).ok(),
                OutboundFrame::Ping => {}
            }
        }
    }
}
