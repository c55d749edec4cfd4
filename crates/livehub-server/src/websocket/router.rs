//! Inbound control-message dispatch.
//!
//! Decodes a frame as a [`ClientMessage`] and applies it to the issuing
//! connection's subscriptions. Decode failures are answered with an `error`
//! frame; they never end the connection.

use livehub_core::{ClientMessage, ConnectionId, DecodeError, ServerMessage};
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::metrics::WS_DECODE_ERRORS_TOTAL;
use crate::registry::HubRegistry;

/// Payload of a data frame.
#[derive(Clone, Copy, Debug)]
pub enum InboundFrame<'a> {
    /// A text frame.
    Text(&'a str),
    /// A binary frame, expected to carry UTF-8 JSON.
    Binary(&'a [u8]),
}

impl InboundFrame<'_> {
    fn decode(self) -> Result<ClientMessage, DecodeError> {
        match self {
            Self::Text(text) => ClientMessage::decode(text),
            Self::Binary(bytes) => ClientMessage::decode_bytes(bytes),
        }
    }
}

/// Handle one inbound frame for `conn_id`. Returns the reply to send, if
/// any.
#[instrument(skip_all, fields(conn_id = %conn_id, kind))]
pub fn route_frame(
    frame: InboundFrame<'_>,
    conn_id: &ConnectionId,
    registry: &HubRegistry,
) -> Option<ServerMessage> {
    let message = match frame.decode() {
        Ok(m) => m,
        Err(e) => {
            counter!(WS_DECODE_ERRORS_TOTAL).increment(1);
            warn!(error = %e, "rejected inbound frame");
            return Some(ServerMessage::error(e.to_string()));
        }
    };

    match message {
        ClientMessage::Subscribe { metrics } => {
            let _ = tracing::Span::current().record("kind", "subscribe");
            let added = registry.subscribe(conn_id, &metrics);
            debug!(requested = metrics.len(), added, "subscribed");
            None
        }
        ClientMessage::Unsubscribe { metrics } => {
            let _ = tracing::Span::current().record("kind", "unsubscribe");
            let removed = registry.unsubscribe(conn_id, &metrics);
            debug!(requested = metrics.len(), removed, "unsubscribed");
            None
        }
        ClientMessage::Ping => {
            let _ = tracing::Span::current().record("kind", "ping");
            Some(ServerMessage::pong())
        }
    }
}
