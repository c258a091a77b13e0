//! Local ownership tracking.
//!
//! The set of partitions this node owns is rebuilt on every recomputation
//! and published as one immutable [`LocalOwnership`]. Readers never see a
//! partially built set.

use crate::queue::QueueKey;
use arc_swap::ArcSwap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Partitions owned for one queue key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedQueue {
    /// Topic at the time of the recomputation.
    pub topic: String,
    pub partitions: BTreeSet<u32>,
}

/// Partitions owned by this node, keyed by queue.
///
/// A key may be present with an empty set: it was lost by the recomputation
/// that produced this value and is kept until the next one so that the loss
/// is announced once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalOwnership {
    queues: HashMap<QueueKey, OwnedQueue>,
}

impl LocalOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: QueueKey, topic: String, partitions: BTreeSet<u32>) {
        self.queues.insert(key, OwnedQueue { topic, partitions });
    }

    pub fn get(&self, key: &QueueKey) -> Option<&OwnedQueue> {
        self.queues.get(key)
    }

    pub fn contains_key(&self, key: &QueueKey) -> bool {
        self.queues.contains_key(key)
    }

    /// Whether this node owns a partition.
    pub fn owns(&self, key: &QueueKey, partition: u32) -> bool {
        self.queues
            .get(key)
            .map(|q| q.partitions.contains(&partition))
            .unwrap_or(false)
    }

    /// Owned partitions of a key, ascending.
    pub fn partitions(&self, key: &QueueKey) -> Vec<u32> {
        self.queues
            .get(key)
            .map(|q| q.partitions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total number of owned partitions.
    pub fn total(&self) -> usize {
        self.queues.values().map(|q| q.partitions.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueueKey, &OwnedQueue)> {
        self.queues.iter()
    }

    /// Keys with at least one owned partition, sorted.
    pub fn owned_keys(&self) -> Vec<QueueKey> {
        let mut keys: Vec<_> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.partitions.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Atomically swapped holder of the current [`LocalOwnership`].
#[derive(Debug)]
pub struct OwnershipState {
    current: ArcSwap<LocalOwnership>,
}

impl OwnershipState {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(LocalOwnership::new()),
        }
    }

    pub fn load(&self) -> Arc<LocalOwnership> {
        self.current.load_full()
    }

    /// Publish a new ownership set, returning the previous one.
    pub fn replace(&self, next: Arc<LocalOwnership>) -> Arc<LocalOwnership> {
        self.current.swap(next)
    }

    pub fn owns(&self, key: &QueueKey, partition: u32) -> bool {
        self.current.load().owns(key, partition)
    }

    pub fn partitions(&self, key: &QueueKey) -> Vec<u32> {
        self.current.load().partitions(key)
    }
}

impl Default for OwnershipState {
    fn default() -> Self {
        Self::new()
    }
}
