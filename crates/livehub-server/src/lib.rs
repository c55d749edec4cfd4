//! # livehub-server
//!
//! Real-time broadcast hub for analytics dashboards over WebSocket.
//!
//! - Registries: live connections and their topic subscriptions, mutated
//!   together behind [`registry::HubRegistry`]
//! - Sessions: per-connection read loop, single writer task, and keepalive
//! - Broadcast: snapshot-then-write fan-out with deferred cleanup of failed
//!   peers
//! - HTTP: upgrade endpoint with pluggable authentication, `/health`,
//!   `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod feed;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AllowAll, AuthError, Authenticator, Credentials, Principal, StaticTokenAuthenticator};
pub use config::ServerConfig;
pub use errors::{RegistryError, ServerError};
pub use registry::HubRegistry;
pub use server::LiveHubServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::broadcast::{BroadcastEngine, BroadcastReport};
