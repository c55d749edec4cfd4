//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! Each session runs three cooperating parts sharing the connection's
//! cancellation token:
//!
//! - the read loop (this task), which routes control frames and enforces the
//!   read deadline
//! - the writer task, the sole owner of the socket's sink
//! - the keepalive task, which queues pings
//!
//! Whichever part stops first cancels the token, the others follow, and the
//! connection goes through [`teardown`] exactly once, before the writer's
//! close handshake.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use livehub_core::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::connection::{ClientConnection, OutboundFrame};
use super::keepalive::{KeepaliveOutcome, run_keepalive};
use super::lifecycle::{DisconnectReason, admit, teardown};
use super::router::{InboundFrame, route_frame};
use crate::registry::HubRegistry;

/// Shared inputs of every session.
#[derive(Clone)]
pub struct SessionContext {
    /// Hub registries.
    pub registry: Arc<HubRegistry>,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Bound on a single outbound write.
    pub write_timeout: Duration,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// How the read loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadOutcome {
    ClientClosed,
    ReadError,
    DeadlineElapsed,
    ReplyFailed,
    Shutdown,
    Cancelled,
}

/// How the writer task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterExit {
    Cancelled,
    Failed,
}

fn resolve_reason(
    read: ReadOutcome,
    keepalive: KeepaliveOutcome,
    writer: WriterExit,
) -> DisconnectReason {
    match read {
        ReadOutcome::ClientClosed => DisconnectReason::ClientClosed,
        ReadOutcome::ReadError => DisconnectReason::ReadError,
        ReadOutcome::DeadlineElapsed => DisconnectReason::KeepaliveTimeout,
        ReadOutcome::ReplyFailed => DisconnectReason::WriteFailed,
        ReadOutcome::Shutdown => DisconnectReason::Shutdown,
        ReadOutcome::Cancelled if keepalive == KeepaliveOutcome::TimedOut => {
            DisconnectReason::KeepaliveTimeout
        }
        ReadOutcome::Cancelled if writer == WriterExit::Failed => DisconnectReason::WriteFailed,
        // Cancelled from outside, e.g. by a failed broadcast that already
        // tore the connection down.
        ReadOutcome::Cancelled => DisconnectReason::WriteFailed,
    }
}

/// Runs [`teardown`] when dropped, so an aborted session still leaves the
/// registries clean and stops its tasks.
struct TeardownGuard<'a> {
    registry: &'a HubRegistry,
    id: ConnectionId,
    reason: DisconnectReason,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        let _ = teardown(self.registry, &self.id, self.reason);
    }
}

/// Run a WebSocket session for an authenticated client.
///
/// `conn` must be the connection whose sender feeds `outbound`. The
/// connection leaves the registries as soon as the read loop and keepalive
/// have stopped; the writer's close handshake runs after that.
#[instrument(skip_all, fields(conn_id = %conn.id))]
pub async fn run_ws_session(
    socket: WebSocket,
    conn: Arc<ClientConnection>,
    outbound: mpsc::Receiver<OutboundFrame>,
    ctx: SessionContext,
) {
    let (sink, mut stream) = socket.split();
    let cancel = conn.cancel_token();

    let Ok(id) = admit(&ctx.registry, conn.clone()) else {
        conn.close();
        return;
    };
    let mut guard = TeardownGuard {
        registry: &ctx.registry,
        id,
        reason: DisconnectReason::ReadError,
    };

    let (exit_tx, exit_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        cancel.clone(),
        ctx.write_timeout,
        exit_tx,
    ));
    let keepalive = {
        let conn = conn.clone();
        let interval = ctx.ping_interval;
        tokio::spawn(async move {
            let outcome = run_keepalive(conn.clone(), interval, conn.cancel_token()).await;
            if outcome == KeepaliveOutcome::TimedOut {
                warn!(conn_id = %conn.id, idle_secs = conn.idle_for().as_secs(), "keepalive timed out");
                conn.close();
            }
            outcome
        })
    };

    let read = read_loop(&mut stream, &conn, &ctx).await;
    conn.close();

    // Both stop promptly once the token is cancelled.
    let keepalive = keepalive.await.unwrap_or(KeepaliveOutcome::Cancelled);
    let writer_exit = exit_rx.await.unwrap_or(WriterExit::Failed);
    guard.reason = resolve_reason(read, keepalive, writer_exit);
    drop(guard);

    let _ = writer.await;
    debug!(?read, ?keepalive, writer = ?writer_exit, "session finished");
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    conn: &ClientConnection,
    ctx: &SessionContext,
) -> ReadOutcome {
    let cancel = conn.cancel_token();
    loop {
        let deadline = conn.read_deadline();
        let next = tokio::select! {
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            () = ctx.shutdown.cancelled() => return ReadOutcome::Shutdown,
            next = time::timeout_at(deadline, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => return ReadOutcome::DeadlineElapsed,
            Ok(None) => return ReadOutcome::ClientClosed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                return ReadOutcome::ReadError;
            }
            Ok(Some(Ok(msg))) => msg,
        };
        conn.mark_activity();

        let reply = match msg {
            Message::Text(text) => {
                route_frame(InboundFrame::Text(text.as_str()), &conn.id, &ctx.registry)
            }
            Message::Binary(data) => {
                route_frame(InboundFrame::Binary(&data), &conn.id, &ctx.registry)
            }
            Message::Ping(_) | Message::Pong(_) => None,
            Message::Close(_) => {
                debug!("client sent close frame");
                return ReadOutcome::ClientClosed;
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = conn.send_message(&reply, ctx.write_timeout).await {
                warn!(error = %e, kind = reply.kind(), "failed to queue reply");
                return ReadOutcome::ReplyFailed;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
    write_timeout: Duration,
    exited: oneshot::Sender<WriterExit>,
) {
    let exit = loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break WriterExit::Cancelled,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break WriterExit::Cancelled,
            },
        };
        let msg = match frame {
            OutboundFrame::Text(text) => Message::Text(text.as_ref().into()),
            OutboundFrame::Ping => Message::Ping(Vec::new().into()),
        };
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break WriterExit::Cancelled,
            sent = time::timeout(write_timeout, sink.send(msg)) => sent,
        };
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "socket write failed");
                break WriterExit::Failed;
            }
            Err(_) => {
                warn!(timeout_ms = write_timeout.as_millis(), "socket write timed out");
                break WriterExit::Failed;
            }
        }
    };

    cancel.cancel();
    let _ = exited.send(exit);
    // Best-effort close handshake.
    let _ = time::timeout(write_timeout, sink.close()).await;
}
