//! WebSocket connection management: per-connection state, keepalive,
//! control-message routing, sessions, and topic broadcast.

pub mod broadcast;
pub mod connection;
pub mod keepalive;
pub mod lifecycle;
pub mod router;
pub mod session;
