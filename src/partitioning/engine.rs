//! Ownership recomputation.
//!
//! [`AssignmentEngine::recalculate`] and
//! [`AssignmentEngine::recalculate_current`] are the only writers of the
//! ownership and assignment snapshots. Calls serialize on an internal lock
//! that is held while the new tables are built and swapped; resolver reads
//! never take it. Tenant routing info is loaded before the lock is taken,
//! so the provider is never called while holding it.

use crate::cluster::{
    ChangeNotifier, MemberDescriptor, MembershipSnapshot, MembershipTracker, PartitionChangeEvent,
    TopologyChangeEvent,
};
use crate::hashing::HashFunction;
use crate::metrics::RoutingMetrics;
use crate::partitioning::assignment::{candidate_ids, compute_assignment, Assignment};
use crate::partitioning::ownership::{LocalOwnership, OwnedQueue, OwnershipState};
use crate::queue::{QueueKey, QueueRegistry};
use crate::routing::TopicPartitionInfo;
use crate::tenant::TenantRoutingCache;
use crate::types::{QueueType, ServiceId, TenantId};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What one recomputation produced.
#[derive(Debug, Clone)]
pub struct RecalculationOutcome {
    pub ownership: Arc<LocalOwnership>,
    /// One event per queue type with changed keys.
    pub partition_events: Vec<Arc<PartitionChangeEvent>>,
    pub topology: Option<Arc<TopologyChangeEvent>>,
    /// Partitions left unassigned this round.
    pub failures: u64,
}

#[derive(Default)]
struct EngineState {
    /// Peer candidate lists seen by the previous recomputation.
    peer_candidates: BTreeMap<QueueKey, Vec<ServiceId>>,
}

/// Computes which partitions this node owns and announces the changes.
pub struct AssignmentEngine {
    hash: HashFunction,
    registry: Arc<QueueRegistry>,
    tenants: Arc<TenantRoutingCache>,
    membership: Arc<MembershipTracker>,
    ownership: Arc<OwnershipState>,
    assignment: ArcSwap<Assignment>,
    notifier: Arc<ChangeNotifier>,
    metrics: Arc<RoutingMetrics>,
    state: Mutex<EngineState>,
}

impl AssignmentEngine {
    pub fn new(
        hash: HashFunction,
        registry: Arc<QueueRegistry>,
        tenants: Arc<TenantRoutingCache>,
        notifier: Arc<ChangeNotifier>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        Self {
            hash,
            registry,
            tenants,
            membership: Arc::new(MembershipTracker::new()),
            ownership: Arc::new(OwnershipState::new()),
            assignment: ArcSwap::from_pointee(Assignment::default()),
            notifier,
            metrics,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn membership(&self) -> &Arc<MembershipTracker> {
        &self.membership
    }

    pub fn ownership(&self) -> &Arc<OwnershipState> {
        &self.ownership
    }

    /// Owner table of the last completed recomputation.
    pub fn assignment(&self) -> Arc<Assignment> {
        self.assignment.load_full()
    }

    /// Recompute ownership from the current registry and the given members.
    pub fn recalculate(&self, this: &MemberDescriptor, peers: &[MemberDescriptor]) -> RecalculationOutcome {
        self.warm_tenants();
        let mut state = self.state.lock();
        let membership = self.membership.update(this.clone(), peers);
        self.recompute(&mut state, this, &membership)
    }

    /// Recompute with the membership of the last recomputation, `None`
    /// before the first one. The membership is read under the lock, so a
    /// recomputation with newer peers queued ahead of this one is kept.
    pub fn recalculate_current(&self) -> Option<RecalculationOutcome> {
        self.warm_tenants();
        let mut state = self.state.lock();
        let membership = self.membership.snapshot();
        let this = membership.this.clone()?;
        Some(self.recompute(&mut state, &this, &membership))
    }

    /// Load routing info of every tenant with registered rule-engine queues.
    fn warm_tenants(&self) {
        let registry = self.registry.snapshot();
        let tenants: BTreeSet<TenantId> = registry
            .keys()
            .filter(|key| key.queue_type == QueueType::RuleEngine && !key.is_system())
            .map(|key| key.tenant_id)
            .collect();
        self.tenants.prefetch(tenants);
    }

    fn recompute(
        &self,
        state: &mut EngineState,
        this: &MemberDescriptor,
        membership: &MembershipSnapshot,
    ) -> RecalculationOutcome {
        let registry = self.registry.snapshot();
        let members = membership.all_members();

        let assignment = compute_assignment(&members, &registry, &self.tenants, self.hash);

        let mut next = LocalOwnership::new();
        for (key, owners) in assignment.partitions_of(&this.service_id) {
            if let Some(metadata) = registry.get(&key) {
                next.insert(key, metadata.topic.clone(), owners);
            }
        }

        let previous = self.ownership.load();

        // Keys lost entirely stay in the new set with no partitions so the
        // loss is announced. Keys already announced and no longer
        // registered are dropped.
        let mut removed = BTreeSet::new();
        for (key, owned) in previous.iter() {
            if !next.contains_key(key)
                && (registry.contains_key(key) || !owned.partitions.is_empty())
            {
                removed.insert(key.clone());
            }
        }
        if this.serves(QueueType::RuleEngine) {
            for key in registry.keys() {
                if key.queue_type == QueueType::RuleEngine
                    && !key.is_system()
                    && !next.contains_key(key)
                {
                    removed.insert(key.clone());
                }
            }
        }
        for key in removed {
            let topic = registry
                .get(&key)
                .map(|m| m.topic.clone())
                .or_else(|| previous.get(&key).map(|q| q.topic.clone()))
                .unwrap_or_default();
            next.insert(key, topic, BTreeSet::new());
        }

        let partition_events = diff_ownership(&previous, &next);
        let owned_total = next.total();
        self.metrics.owned_partitions.set(owned_total as i64);

        let failures = assignment.failures();
        let next = Arc::new(next);
        self.ownership.replace(next.clone());
        self.assignment.store(Arc::new(assignment));

        for event in &partition_events {
            self.notifier.publish_partitions(event.clone());
        }

        let peer_candidates = candidate_ids(&membership.peers, &registry);
        let changed_keys = diff_candidates(&state.peer_candidates, &peer_candidates);
        state.peer_candidates = peer_candidates;
        let topology = if changed_keys.is_empty() {
            None
        } else {
            tracing::debug!(changed = changed_keys.len(), "Cluster topology changed");
            let event = Arc::new(TopologyChangeEvent { changed_keys });
            self.notifier.publish_topology(event.clone());
            Some(event)
        };

        self.metrics.recalculations.inc();
        if failures > 0 {
            self.metrics.partition_failures.inc_by(failures);
        }

        tracing::info!(
            service_id = %this.service_id,
            peers = membership.peers.len(),
            owned_partitions = owned_total,
            changed_queue_types = partition_events.len(),
            "Recalculated partitions"
        );

        RecalculationOutcome {
            ownership: next,
            partition_events,
            topology,
            failures,
        }
    }
}

impl std::fmt::Debug for AssignmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentEngine")
            .field("hash", &self.hash)
            .field("owned_partitions", &self.ownership.load().total())
            .finish()
    }
}

fn topic_partitions(key: &QueueKey, owned: &OwnedQueue) -> BTreeSet<TopicPartitionInfo> {
    let tenant_id = (!key.is_system()).then_some(key.tenant_id);
    owned
        .partitions
        .iter()
        .map(|&p| TopicPartitionInfo::new(owned.topic.clone(), tenant_id, Some(p), true))
        .collect()
}

/// One event per queue type carrying every key whose partition set changed.
fn diff_ownership(previous: &LocalOwnership, next: &LocalOwnership) -> Vec<Arc<PartitionChangeEvent>> {
    let mut by_type: BTreeMap<QueueType, PartitionChangeEvent> = BTreeMap::new();

    for (key, owned) in next.iter() {
        let old = previous.get(key);
        if old.map(|o| &o.partitions) == Some(&owned.partitions) {
            continue;
        }

        let event = by_type
            .entry(key.queue_type)
            .or_insert_with(|| PartitionChangeEvent {
                queue_type: key.queue_type,
                old_partitions: BTreeMap::new(),
                new_partitions: BTreeMap::new(),
            });
        event.old_partitions.insert(
            key.clone(),
            old.map(|o| topic_partitions(key, o)).unwrap_or_default(),
        );
        event
            .new_partitions
            .insert(key.clone(), topic_partitions(key, owned));
    }

    by_type.into_values().map(Arc::new).collect()
}

/// Keys whose candidate service list differs between two snapshots.
fn diff_candidates(
    previous: &BTreeMap<QueueKey, Vec<ServiceId>>,
    next: &BTreeMap<QueueKey, Vec<ServiceId>>,
) -> BTreeSet<QueueKey> {
    previous
        .keys()
        .chain(next.keys())
        .filter(|key| previous.get(*key) != next.get(*key))
        .cloned()
        .collect()
}
