//! Events handed to the hub by producers.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::messages::ServerMessage;
use crate::topic::Topic;

/// A producer-supplied event. Never stored; delivered best-effort.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Topic the event belongs to; `None` marks a global event.
    pub topic: Option<Topic>,
    /// Arbitrary payload.
    pub data: Value,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// A topic-scoped event stamped now.
    pub fn on_topic(topic: impl Into<Topic>, data: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            data,
            timestamp: Utc::now(),
        }
    }

    /// A global event stamped now.
    #[must_use]
    pub fn global(data: Value) -> Self {
        Self {
            topic: None,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Override the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The outbound frame for this event: `analytics_update` for topic events,
    /// `system_health` for global ones.
    #[must_use]
    pub fn to_message(&self) -> ServerMessage {
        match &self.topic {
            Some(topic) => {
                ServerMessage::analytics_update(topic.clone(), self.data.clone(), self.timestamp)
            }
            None => ServerMessage::system_health(self.data.clone(), self.timestamp),
        }
    }
}
