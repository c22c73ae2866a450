//! Topics the application wants live updates for.

use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Set of template group ids to keep joined.
///
/// Survives transport drops; the connection manager replays it into every
/// new connection. Pure state, no I/O.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    topics: Mutex<BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic. Returns false if it was already present.
    pub fn join(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_string())
    }

    /// Remove a topic. Returns false if it was not present.
    pub fn leave(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    /// Snapshot of the current topics, in sorted order.
    pub fn members(&self) -> BTreeSet<String> {
        self.topics.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.lock().is_empty()
    }

    /// Remove and return every topic.
    pub fn drain(&self) -> BTreeSet<String> {
        std::mem::take(&mut *self.topics.lock())
    }
}
