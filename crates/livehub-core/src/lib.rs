//! # livehub-core
//!
//! Foundation types shared by every livehub crate:
//!
//! - **IDs**: [`ConnectionId`] branded newtype
//! - **Topics**: [`Topic`], the opaque metric name clients subscribe to
//! - **Wire messages**: [`ClientMessage`] (inbound) and [`ServerMessage`] (outbound)
//! - **Events**: [`Event`], what producers hand to the broadcast engine
//! - **Errors**: [`DecodeError`] for inbound frames
//! - **Logging**: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod topic;

pub use errors::DecodeError;
pub use events::Event;
pub use ids::ConnectionId;
pub use messages::{ClientMessage, ServerMessage};
pub use topic::Topic;
