//! Event fan-out to subscribed WebSocket clients.
//!
//! A broadcast resolves its targets from a registry snapshot, releases every
//! lock, and then writes to all targets concurrently with a per-write bound.
//! Targets whose write fails are torn down on a separate task once the
//! fan-out has finished, unless they were already closing, in which case
//! their own session records the disconnect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use livehub_core::{ConnectionId, Event, ServerMessage, Topic};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::{ClientConnection, OutboundFrame};
use super::lifecycle::{DisconnectReason, teardown};
use crate::metrics::{WS_BROADCAST_FAILURES_TOTAL, WS_BROADCAST_TOTAL};
use crate::registry::HubRegistry;

/// What happened to one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was addressed to.
    pub recipients: usize,
    /// Connections whose write succeeded.
    pub delivered: usize,
    /// Connections whose write failed; they are being torn down.
    pub failed: Vec<ConnectionId>,
}

/// Fans events out over the hub's registries.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<HubRegistry>,
    write_timeout: Duration,
}

impl BroadcastEngine {
    /// Create an engine writing with the given per-write bound.
    pub fn new(registry: Arc<HubRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// The registries this engine reads.
    pub fn registry(&self) -> &Arc<HubRegistry> {
        &self.registry
    }

    /// Send an `analytics_update` to every subscriber of `topic`.
    pub async fn broadcast_topic(&self, topic: Topic, data: Value) -> BroadcastReport {
        let targets = self.registry.subscriber_connections(topic.as_str());
        let message = ServerMessage::analytics_update(topic, data, Utc::now());
        self.fan_out(targets, &message, "topic").await
    }

    /// Send a `system_health` frame to every connection.
    pub async fn broadcast_all(&self, data: Value) -> BroadcastReport {
        let targets = self.registry.snapshot();
        let message = ServerMessage::system_health(data, Utc::now());
        self.fan_out(targets, &message, "all").await
    }

    /// Deliver a producer event, keeping its timestamp.
    pub async fn publish(&self, event: &Event) -> BroadcastReport {
        let (targets, scope) = match &event.topic {
            Some(topic) => (self.registry.subscriber_connections(topic.as_str()), "topic"),
            None => (self.registry.snapshot(), "all"),
        };
        self.fan_out(targets, &event.to_message(), scope).await
    }

    async fn fan_out(
        &self,
        targets: Vec<Arc<ClientConnection>>,
        message: &ServerMessage,
        scope: &'static str,
    ) -> BroadcastReport {
        counter!(WS_BROADCAST_TOTAL, "scope" => scope).increment(1);
        if targets.is_empty() {
            debug!(kind = message.kind(), scope, "broadcast has no recipients");
            return BroadcastReport::default();
        }

        let frame: Arc<str> = match message.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize broadcast");
                return BroadcastReport {
                    recipients: targets.len(),
                    ..BroadcastReport::default()
                };
            }
        };

        let writes = targets.iter().map(|conn| {
            let frame = OutboundFrame::Text(frame.clone());
            async move { (conn, conn.send_timeout(frame, self.write_timeout).await) }
        });
        let results = join_all(writes).await;

        let recipients = results.len();
        let mut failed = Vec::new();
        let mut doomed = Vec::new();
        for (conn, result) in results {
            if let Err(e) = result {
                if conn.is_closed() {
                    debug!(conn_id = %conn.id, error = %e, "broadcast skipped closing peer");
                } else {
                    warn!(conn_id = %conn.id, error = %e, "broadcast write failed");
                    doomed.push(conn.id.clone());
                }
                failed.push(conn.id.clone());
            }
        }
        let delivered = recipients - failed.len();
        debug!(kind = message.kind(), scope, recipients, delivered, "broadcast complete");

        if !failed.is_empty() {
            counter!(WS_BROADCAST_FAILURES_TOTAL).increment(failed.len() as u64);
        }
        if !doomed.is_empty() {
            self.schedule_cleanup(doomed);
        }

        BroadcastReport {
            recipients,
            delivered,
            failed,
        }
    }

    fn schedule_cleanup(&self, failed: Vec<ConnectionId>) {
        let registry = self.registry.clone();
        drop(tokio::spawn(async move {
            for id in &failed {
                let _ = teardown(&registry, id, DisconnectReason::WriteFailed);
            }
        }));
    }
}
