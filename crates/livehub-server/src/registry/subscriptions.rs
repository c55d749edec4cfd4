//! Connection-to-topic subscriptions.

use std::collections::{HashMap, HashSet};

use livehub_core::{ConnectionId, Topic};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Forward and reverse subscription maps.
///
/// `by_conn` holds an entry for every registered connection, even one with
/// no topics. `by_topic` only holds topics with at least one subscriber.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_conn: HashMap<ConnectionId, HashSet<Topic>>,
    by_topic: HashMap<Topic, HashSet<ConnectionId>>,
}

impl SubscriptionIndex {
    /// Create the empty entry for a new connection.
    pub(super) fn open(&mut self, id: ConnectionId) {
        let _ = self.by_conn.entry(id).or_default();
    }

    /// Drop a connection and every topic it held.
    pub(super) fn close(&mut self, id: &ConnectionId) -> Option<HashSet<Topic>> {
        let topics = self.by_conn.remove(id)?;
        for topic in &topics {
            self.detach(topic, id);
        }
        Some(topics)
    }

    /// Add topics for `id`. Returns how many were new.
    pub(super) fn add(&mut self, id: &ConnectionId, topics: &[Topic]) -> usize {
        let Some(held) = self.by_conn.get_mut(id) else {
            return 0;
        };
        let mut added = 0;
        for topic in topics {
            if held.insert(topic.clone()) {
                let _ = self
                    .by_topic
                    .entry(topic.clone())
                    .or_default()
                    .insert(id.clone());
                added += 1;
            }
        }
        added
    }

    /// Remove topics for `id`. Returns how many were held.
    pub(super) fn remove(&mut self, id: &ConnectionId, topics: &[Topic]) -> usize {
        let Some(held) = self.by_conn.get_mut(id) else {
            return 0;
        };
        let removed: Vec<&Topic> = topics.iter().filter(|t| held.remove(*t)).collect();
        for topic in &removed {
            self.detach(topic, id);
        }
        removed.len()
    }

    fn detach(&mut self, topic: &Topic, id: &ConnectionId) {
        if let Some(subscribers) = self.by_topic.get_mut(topic) {
            let _ = subscribers.remove(id);
            if subscribers.is_empty() {
                let _ = self.by_topic.remove(topic);
            }
        }
    }

    /// Whether `id` has an entry.
    pub fn has_entry(&self, id: &ConnectionId) -> bool {
        self.by_conn.contains_key(id)
    }

    /// Topics held by `id`.
    pub fn topics_of(&self, id: &ConnectionId) -> HashSet<Topic> {
        self.by_conn.get(id).cloned().unwrap_or_default()
    }

    /// Handles subscribed to `topic`.
    pub fn subscribers_of(&self, topic: &str) -> HashSet<ConnectionId> {
        self.by_topic.get(topic).cloned().unwrap_or_default()
    }

    pub(super) fn subscribers_ref(&self, topic: &str) -> Option<&HashSet<ConnectionId>> {
        self.by_topic.get(topic)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.by_topic.len()
    }

    /// Number of connection entries.
    pub fn entry_count(&self) -> usize {
        self.by_conn.len()
    }
}

/// Subscription index behind its own lock.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<SubscriptionIndex>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics held by `id`.
    pub fn topics_of(&self, id: &ConnectionId) -> HashSet<Topic> {
        self.inner.read().topics_of(id)
    }

    /// Handles subscribed to `topic`.
    pub fn subscribers_of(&self, topic: &str) -> HashSet<ConnectionId> {
        self.inner.read().subscribers_of(topic)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner.read().topic_count()
    }

    pub(super) fn read(&self) -> RwLockReadGuard<'_, SubscriptionIndex> {
        self.inner.read()
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, SubscriptionIndex> {
        self.inner.write()
    }
}
