//! Ownership and topology change events.

use crate::queue::QueueKey;
use crate::routing::TopicPartitionInfo;
use crate::types::QueueType;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of each broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Partitions gained and lost by this node for one queue type.
///
/// Only keys whose ownership changed are present. A key mapped to an empty
/// new set was lost entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionChangeEvent {
    pub queue_type: QueueType,
    pub old_partitions: BTreeMap<QueueKey, BTreeSet<TopicPartitionInfo>>,
    pub new_partitions: BTreeMap<QueueKey, BTreeSet<TopicPartitionInfo>>,
}

impl PartitionChangeEvent {
    /// New partitions of every changed key with the given queue name.
    pub fn partitions_for(&self, queue_name: &str) -> BTreeSet<TopicPartitionInfo> {
        self.new_partitions
            .iter()
            .filter(|(key, _)| key.queue_name == queue_name)
            .flat_map(|(_, partitions)| partitions.iter().cloned())
            .collect()
    }

    /// Keys this node no longer owns any partition of.
    pub fn removed_keys(&self) -> Vec<&QueueKey> {
        self.new_partitions
            .iter()
            .filter(|(_, partitions)| partitions.is_empty())
            .map(|(key, _)| key)
            .collect()
    }

    /// Keys carried by this event.
    pub fn keys(&self) -> impl Iterator<Item = &QueueKey> {
        self.new_partitions.keys()
    }
}

/// The peer candidate lists of some queue keys changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyChangeEvent {
    pub changed_keys: BTreeSet<QueueKey>,
}

impl TopologyChangeEvent {
    /// Whether any changed key is of the given type.
    pub fn affects(&self, queue_type: QueueType) -> bool {
        self.changed_keys.iter().any(|k| k.queue_type == queue_type)
    }
}

/// Fan-out of change events to independent consumers.
///
/// Publishing never blocks and succeeds with no subscribers. A slow
/// subscriber that falls behind by more than the channel capacity skips
/// the oldest events.
#[derive(Debug)]
pub struct ChangeNotifier {
    partitions: broadcast::Sender<Arc<PartitionChangeEvent>>,
    topology: broadcast::Sender<Arc<TopologyChangeEvent>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (partitions, _) = broadcast::channel(capacity.max(1));
        let (topology, _) = broadcast::channel(capacity.max(1));
        Self {
            partitions,
            topology,
        }
    }

    pub fn publish_partitions(&self, event: Arc<PartitionChangeEvent>) {
        let _ = self.partitions.send(event);
    }

    pub fn publish_topology(&self, event: Arc<TopologyChangeEvent>) {
        let _ = self.topology.send(event);
    }

    /// Receive partition changes of every queue type.
    pub fn subscribe_partitions(&self) -> PartitionEventReceiver {
        PartitionEventReceiver {
            rx: self.partitions.subscribe(),
            queue_type: None,
        }
    }

    /// Receive partition changes of one queue type.
    pub fn subscribe_partitions_for(&self, queue_type: QueueType) -> PartitionEventReceiver {
        PartitionEventReceiver {
            rx: self.partitions.subscribe(),
            queue_type: Some(queue_type),
        }
    }

    pub fn subscribe_topology(&self) -> broadcast::Receiver<Arc<TopologyChangeEvent>> {
        self.topology.subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Partition change subscription, optionally filtered by queue type.
#[derive(Debug)]
pub struct PartitionEventReceiver {
    rx: broadcast::Receiver<Arc<PartitionChangeEvent>>,
    queue_type: Option<QueueType>,
}

impl PartitionEventReceiver {
    /// Next matching event, or `None` once the notifier is dropped.
    pub async fn recv(&mut self) -> Option<Arc<PartitionChangeEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Partition change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<PartitionChangeEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Partition change subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &PartitionChangeEvent) -> bool {
        self.queue_type.map_or(true, |t| t == event.queue_type)
    }
}
