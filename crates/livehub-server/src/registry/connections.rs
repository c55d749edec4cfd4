//! Set of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use livehub_core::ConnectionId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::websocket::connection::ClientConnection;

pub(super) type ConnectionMap = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Live connections indexed by handle.
///
/// Reads run concurrently; inserts and removals are exclusive. Mutation goes
/// through [`HubRegistry`](super::HubRegistry) so the subscription side
/// stays in step.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<ConnectionMap>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every live connection.
    ///
    /// The lock is released before returning, so callers may await on the
    /// result.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.read().values().cloned().collect()
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.inner.read().get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub(super) fn read(&self) -> RwLockReadGuard<'_, ConnectionMap> {
        self.inner.read()
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, ConnectionMap> {
        self.inner.write()
    }
}
