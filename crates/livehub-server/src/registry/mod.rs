//! Connection and subscription registries.
//!
//! [`HubRegistry`] is the only way to mutate either side. Every operation
//! that touches both takes the connection lock first and the subscription
//! lock second, and neither lock is held across an `.await`.

pub mod connections;
pub mod subscriptions;

use std::collections::HashSet;
use std::sync::Arc;

use livehub_core::{ConnectionId, Topic};

pub use connections::ConnectionRegistry;
pub use subscriptions::SubscriptionRegistry;

use crate::errors::RegistryError;
use crate::websocket::connection::ClientConnection;

/// Both registries behind one facade.
#[derive(Default)]
pub struct HubRegistry {
    connections: ConnectionRegistry,
    subscriptions: SubscriptionRegistry,
}

impl HubRegistry {
    /// Create empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with an empty subscription set.
    ///
    /// A handle that is already live is refused and both registries are left
    /// untouched.
    pub fn register(&self, conn: Arc<ClientConnection>) -> Result<ConnectionId, RegistryError> {
        let id = conn.id.clone();
        let mut conns = self.connections.write();
        if conns.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        let mut subs = self.subscriptions.write();
        let _ = conns.insert(id.clone(), conn);
        subs.open(id.clone());
        Ok(id)
    }

    /// Remove a connection and its subscriptions.
    ///
    /// Returns the removed connection, or `None` if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write();
        let mut subs = self.subscriptions.write();
        let removed = conns.remove(id);
        let _ = subs.close(id);
        removed
    }

    /// Subscribe `id` to `topics`. Returns how many were new; a handle that
    /// is not registered gains nothing.
    pub fn subscribe(&self, id: &ConnectionId, topics: &[Topic]) -> usize {
        let conns = self.connections.read();
        if !conns.contains_key(id) {
            return 0;
        }
        self.subscriptions.write().add(id, topics)
    }

    /// Unsubscribe `id` from `topics`. Returns how many were held.
    pub fn unsubscribe(&self, id: &ConnectionId, topics: &[Topic]) -> usize {
        let _conns = self.connections.read();
        self.subscriptions.write().remove(id, topics)
    }

    /// Topics held by `id`.
    pub fn topics_of(&self, id: &ConnectionId) -> HashSet<Topic> {
        self.subscriptions.topics_of(id)
    }

    /// Handles subscribed to `topic`.
    pub fn subscribers_of(&self, topic: &str) -> HashSet<ConnectionId> {
        self.subscriptions.subscribers_of(topic)
    }

    /// Snapshot of the connections subscribed to `topic`.
    pub fn subscriber_connections(&self, topic: &str) -> Vec<Arc<ClientConnection>> {
        let conns = self.connections.read();
        let subs = self.subscriptions.read();
        subs.subscribers_ref(topic)
            .map(|ids| ids.iter().filter_map(|id| conns.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live connection.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.snapshot()
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains(id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.subscriptions.topic_count()
    }

    /// Read-only view of the connection side.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Read-only view of the subscription side.
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Whether every subscription entry has a live connection and vice versa.
    pub fn is_consistent(&self) -> bool {
        let conns = self.connections.read();
        let subs = self.subscriptions.read();
        conns.len() == subs.entry_count() && conns.keys().all(|id| subs.has_entry(id))
    }
}
