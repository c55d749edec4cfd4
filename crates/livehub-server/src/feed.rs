//! Built-in `system_health` producer.
//!
//! Periodically broadcasts hub vitals to every connection. Disabled unless a
//! health interval is configured.

use std::time::Duration;

use serde_json::json;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::websocket::broadcast::BroadcastEngine;

/// Broadcast hub vitals every `interval` until `cancel` fires.
pub async fn run_health_feed(
    engine: BroadcastEngine,
    interval: Duration,
    started: Instant,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "health feed started");
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let registry = engine.registry();
                let data = json!({
                    "uptime_secs": started.elapsed().as_secs(),
                    "connections": registry.connection_count(),
                    "topics": registry.topic_count(),
                });
                let report = engine.broadcast_all(data).await;
                debug!(recipients = report.recipients, "health feed tick");
            }
            () = cancel.cancelled() => break,
        }
    }
    info!("health feed stopped");
}
