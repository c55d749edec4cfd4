//! Error types shared across the hub.

use thiserror::Error;

/// Why an inbound frame could not be turned into a control message.
///
/// Every variant is non-fatal: the router answers with an `error` frame and
/// keeps the connection open.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or a known variant has the wrong shape.
    #[error("invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame is a JSON value without a string `type` field.
    #[error("message is missing a \"type\" field")]
    MissingType,
    /// The `type` field names no known control message.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// A binary frame whose payload is not UTF-8.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}
