//! Wire messages exchanged with dashboard clients.
//!
//! Both directions are closed, internally tagged enums keyed on `"type"`:
//!
//! | Direction | `type` | Fields |
//! |-----------|--------|--------|
//! | in  | `subscribe`        | `metrics: [topic]` |
//! | in  | `unsubscribe`      | `metrics: [topic]` |
//! | in  | `ping`             | none |
//! | out | `pong`             | `timestamp` |
//! | out | `analytics_update` | `metric`, `data`, `time` |
//! | out | `system_health`    | `data`, `time` |
//! | out | `error`            | `message` |
//!
//! All times are unix seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::topic::Topic;

/// An inbound control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving updates for the listed topics.
    Subscribe {
        /// Topics to add. A missing list means no topics.
        #[serde(default)]
        metrics: Vec<Topic>,
    },
    /// Stop receiving updates for the listed topics.
    Unsubscribe {
        /// Topics to remove. A missing list means no topics.
        #[serde(default)]
        metrics: Vec<Topic>,
    },
    /// Application-level ping; answered with [`ServerMessage::Pong`].
    Ping,
}

impl ClientMessage {
    /// Tags accepted on the wire.
    pub const KNOWN_TYPES: [&'static str; 3] = ["subscribe", "unsubscribe", "ping"];

    /// Decode a raw text frame.
    ///
    /// Unknown tags are reported separately from malformed frames so the
    /// reply can cite the offending type.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?;
        if !Self::KNOWN_TYPES.contains(&kind) {
            return Err(DecodeError::UnknownType(kind.to_owned()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode(text)
    }
}

/// An outbound frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a client `ping`.
    Pong {
        /// Unix seconds when the reply was built.
        timestamp: i64,
    },
    /// A topic-scoped analytics event.
    AnalyticsUpdate {
        /// The topic the event was published on.
        metric: Topic,
        /// Arbitrary payload supplied by the producer.
        data: Value,
        /// Unix seconds of the event.
        time: i64,
    },
    /// A global event delivered to every connection.
    SystemHealth {
        /// Arbitrary payload supplied by the producer.
        data: Value,
        /// Unix seconds of the event.
        time: i64,
    },
    /// A non-fatal protocol error.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// `pong` stamped with the current time.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now().timestamp(),
        }
    }

    /// `error` frame with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `analytics_update` for `metric` stamped at `at`.
    #[must_use]
    pub fn analytics_update(metric: Topic, data: Value, at: DateTime<Utc>) -> Self {
        Self::AnalyticsUpdate {
            metric,
            data,
            time: at.timestamp(),
        }
    }

    /// `system_health` stamped at `at`.
    #[must_use]
    pub fn system_health(data: Value, at: DateTime<Utc>) -> Self {
        Self::SystemHealth {
            data,
            time: at.timestamp(),
        }
    }

    /// The wire tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::AnalyticsUpdate { .. } => "analytics_update",
            Self::SystemHealth { .. } => "system_health",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
