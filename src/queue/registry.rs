//! Copy-on-write registry of queue metadata.

use crate::config::{CompanionTopics, PartitionConfig};
use crate::error::{Error, Result};
use crate::queue::key::{
    QueueDelete, QueueKey, QueueMetadata, QueueUpdate, EVENTS_QUEUE_NAME, STATES_QUEUE_NAME,
};
use crate::types::{QueueType, TenantId};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of the registry.
pub type RegistrySnapshot = Arc<HashMap<QueueKey, QueueMetadata>>;

/// Concurrent mapping from [`QueueKey`] to [`QueueMetadata`].
///
/// Readers load the current snapshot without locking. Writers build a new
/// map and publish it with a compare-and-swap loop, so a batch becomes
/// visible all at once or not at all.
pub struct QueueRegistry {
    queues: ArcSwap<HashMap<QueueKey, QueueMetadata>>,
    companion: CompanionTopics,
}

impl QueueRegistry {
    /// Create a registry seeded with the system queues from the config.
    pub fn new(config: &PartitionConfig) -> Self {
        let mut queues = HashMap::new();
        for queue_type in QueueType::ALL {
            let settings = config.queue(queue_type);
            queues.insert(
                QueueKey::main(queue_type),
                QueueMetadata::new(settings.topic.clone(), settings.partitions),
            );
        }

        let registry = Self {
            queues: ArcSwap::from_pointee(HashMap::new()),
            companion: config.companion.clone(),
        };
        let main = QueueKey::main(QueueType::RuleEngine);
        let partitions = config.rule_engine.partitions;
        for (key, metadata) in registry.companion_entries(&main, partitions) {
            queues.insert(key, metadata);
        }
        registry.queues.store(Arc::new(queues));
        registry
    }

    /// Create an empty registry.
    pub fn empty(companion: CompanionTopics) -> Self {
        Self {
            queues: ArcSwap::from_pointee(HashMap::new()),
            companion,
        }
    }

    fn companion_entries(&self, main: &QueueKey, partitions: u32) -> Vec<(QueueKey, QueueMetadata)> {
        main.companions()
            .into_iter()
            .filter_map(|key| {
                let topic = match key.queue_name.as_str() {
                    EVENTS_QUEUE_NAME => self.companion.events_topic.clone(),
                    STATES_QUEUE_NAME => self.companion.states_topic.clone(),
                    _ => return None,
                };
                Some((key, QueueMetadata::new(topic, partitions)))
            })
            .collect()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.queues.load_full()
    }

    /// Look up a key.
    pub fn get(&self, key: &QueueKey) -> Option<QueueMetadata> {
        self.queues.load().get(key).cloned()
    }

    /// Whether a key is registered.
    pub fn contains(&self, key: &QueueKey) -> bool {
        self.queues.load().contains_key(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.queues.load().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.queues.load().is_empty()
    }

    /// All keys of a queue type, sorted.
    pub fn keys_of(&self, queue_type: QueueType) -> Vec<QueueKey> {
        let mut keys: Vec<_> = self
            .queues
            .load()
            .keys()
            .filter(|k| k.queue_type == queue_type)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Insert or replace a single queue. Rule-engine "main" queues cascade
    /// their partition count to their companions.
    pub fn upsert(&self, key: QueueKey, metadata: QueueMetadata) -> Result<Vec<QueueKey>> {
        validate(&key, &metadata)?;
        let entries = self.with_companions(key, metadata);
        let touched: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();

        self.queues.rcu(|current| {
            let mut next = HashMap::clone(current);
            for (key, metadata) in &entries {
                next.insert(key.clone(), metadata.clone());
            }
            next
        });

        Ok(touched)
    }

    /// Remove a single queue and its companions.
    pub fn remove(&self, key: &QueueKey) -> Vec<QueueKey> {
        let companions = key.companions();
        self.remove_where(|candidate| candidate == key || companions.contains(candidate))
    }

    /// Apply a batch of queue updates atomically.
    ///
    /// Every entry is validated first; one invalid entry rejects the batch
    /// and leaves the registry untouched. Returns the keys written,
    /// companions included.
    pub fn apply_updates(&self, updates: &[QueueUpdate]) -> Result<Vec<QueueKey>> {
        let mut entries = Vec::with_capacity(updates.len());
        for update in updates {
            let key = update.key();
            let metadata = QueueMetadata::new(update.topic.clone(), update.partitions)
                .with_duplicate_to_all_partitions(update.duplicate_msg_to_all_partitions);
            validate(&key, &metadata)?;
            entries.extend(self.with_companions(key, metadata));
        }

        self.queues.rcu(|current| {
            let mut next = HashMap::clone(current);
            for (key, metadata) in &entries {
                next.insert(key.clone(), metadata.clone());
            }
            next
        });

        tracing::debug!(updates = updates.len(), keys = entries.len(), "Applied queue updates");
        Ok(entries.into_iter().map(|(k, _)| k).collect())
    }

    /// Apply a batch of queue deletions atomically. Returns the keys that
    /// were removed, companions included.
    pub fn apply_deletes(&self, deletes: &[QueueDelete]) -> Vec<QueueKey> {
        let targets: Vec<QueueKey> = deletes
            .iter()
            .flat_map(|delete| {
                let key = delete.key();
                let mut keys = key.companions();
                keys.push(key);
                keys
            })
            .collect();

        let removed = self.remove_where(|candidate| targets.contains(candidate));
        tracing::debug!(deletes = deletes.len(), removed = removed.len(), "Applied queue deletes");
        removed
    }

    /// Remove every queue owned by a tenant.
    pub fn remove_tenant(&self, tenant_id: TenantId) -> Vec<QueueKey> {
        if tenant_id.is_system() {
            tracing::warn!("Refusing to remove system tenant queues");
            return Vec::new();
        }
        self.remove_where(|candidate| candidate.tenant_id == tenant_id)
    }

    fn with_companions(&self, key: QueueKey, metadata: QueueMetadata) -> Vec<(QueueKey, QueueMetadata)> {
        let partitions = metadata.partitions;
        let companions = self.companion_entries(&key, partitions);
        let mut entries = Vec::with_capacity(1 + companions.len());
        entries.push((key, metadata));
        entries.extend(companions);
        entries
    }

    fn remove_where<F>(&self, predicate: F) -> Vec<QueueKey>
    where
        F: Fn(&QueueKey) -> bool,
    {
        let mut removed = Vec::new();
        self.queues.rcu(|current| {
            removed.clear();
            let mut next = HashMap::with_capacity(current.len());
            for (key, metadata) in current.iter() {
                if predicate(key) {
                    removed.push(key.clone());
                } else {
                    next.insert(key.clone(), metadata.clone());
                }
            }
            next
        });
        removed.sort();
        removed
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.len())
            .finish()
    }
}

fn validate(key: &QueueKey, metadata: &QueueMetadata) -> Result<()> {
    if metadata.partitions == 0 {
        return Err(Error::InvalidQueue {
            key: key.to_string(),
            reason: "partition count must be at least 1".to_string(),
        });
    }
    if metadata.topic.is_empty() {
        return Err(Error::InvalidQueue {
            key: key.to_string(),
            reason: "topic must not be empty".to_string(),
        });
    }
    if key.queue_name.is_empty() {
        return Err(Error::InvalidQueue {
            key: key.to_string(),
            reason: "queue name must not be empty".to_string(),
        });
    }
    Ok(())
}
