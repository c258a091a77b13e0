//! The partition service.
//!
//! [`PartitionService`] ties the registry, tenant cache, assignment engine
//! and change notifier together and answers routing questions. Resolution
//! reads the current registry and ownership snapshots and never waits on a
//! recomputation.

use crate::cluster::{
    ChangeNotifier, MemberDescriptor, MembershipSnapshot, PartitionRecalculator,
};
use crate::config::PartitionConfig;
use crate::error::{Error, Result};
use crate::hashing::{partition_for, HashFunction};
use crate::metrics::RoutingMetrics;
use crate::partitioning::{Assignment, AssignmentEngine, LocalOwnership, RecalculationOutcome};
use crate::queue::{QueueDelete, QueueKey, QueueMetadata, QueueRegistry, QueueUpdate, MAIN_QUEUE_NAME};
use crate::routing::TopicPartitionInfo;
use crate::tenant::{TenantInfoProvider, TenantRoutingCache};
use crate::types::{EntityId, QueueType, ServiceId, TenantId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Resolver facade over the cluster's partition assignment.
pub struct PartitionService {
    config: PartitionConfig,
    hash: HashFunction,
    registry: Arc<QueueRegistry>,
    tenants: Arc<TenantRoutingCache>,
    notifier: Arc<ChangeNotifier>,
    metrics: Arc<RoutingMetrics>,
    engine: AssignmentEngine,
}

impl PartitionService {
    /// Build a service from configuration.
    ///
    /// Fails when the configuration is invalid, including an unknown hash
    /// function name.
    pub fn new(config: PartitionConfig, provider: Arc<dyn TenantInfoProvider>) -> Result<Self> {
        config.validate()?;
        let hash = config.hash_function()?;

        let registry = Arc::new(QueueRegistry::new(&config));
        let tenants = Arc::new(TenantRoutingCache::new(provider));
        let notifier = Arc::new(ChangeNotifier::new());
        let metrics = Arc::new(RoutingMetrics::new());
        let engine = AssignmentEngine::new(
            hash,
            registry.clone(),
            tenants.clone(),
            notifier.clone(),
            metrics.clone(),
        );

        tracing::info!(
            hash_function = hash.name(),
            queues = registry.len(),
            "Partition service created"
        );

        Ok(Self {
            config,
            hash,
            registry,
            tenants,
            notifier,
            metrics,
            engine,
        })
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn tenants(&self) -> &Arc<TenantRoutingCache> {
        &self.tenants
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    /// Ownership of this node as of the last recomputation.
    pub fn ownership(&self) -> Arc<LocalOwnership> {
        self.engine.ownership().load()
    }

    /// Owner table of the last recomputation.
    pub fn assignment(&self) -> Arc<Assignment> {
        self.engine.assignment()
    }

    /// Membership view of the last recomputation.
    pub fn membership(&self) -> Arc<MembershipSnapshot> {
        self.engine.membership().snapshot()
    }

    /// Recompute ownership for `this` node and the given peers.
    pub fn recalculate(&self, this: &MemberDescriptor, peers: &[MemberDescriptor]) -> RecalculationOutcome {
        self.engine.recalculate(this, peers)
    }

    // ---- resolution ----

    /// Resolve the partition an entity's messages go to.
    ///
    /// Fails with [`Error::TenantNotFound`] for an unknown tenant of an
    /// isolatable queue type, and with [`Error::QueueNotFound`] when not
    /// even the system main queue of the type is registered.
    pub fn resolve(
        &self,
        queue_type: QueueType,
        queue_name: Option<&str>,
        tenant_id: TenantId,
        entity_id: &EntityId,
    ) -> Result<TopicPartitionInfo> {
        let (key, metadata) = self.resolve_queue(queue_type, queue_name, tenant_id)?;
        let partition = partition_for(self.hash.hash_entity(entity_id), metadata.partitions);
        tracing::trace!(queue_key = %key, partition, "Resolved partition");
        Ok(self.partition_info(&key, &metadata, partition))
    }

    /// Resolve to a partition chosen by the caller, skipping hashing.
    pub fn resolve_partition(
        &self,
        queue_type: QueueType,
        queue_name: Option<&str>,
        tenant_id: TenantId,
        partition: u32,
    ) -> Result<TopicPartitionInfo> {
        let (key, metadata) = self.resolve_queue(queue_type, queue_name, tenant_id)?;
        if partition >= metadata.partitions {
            return Err(Error::InvalidQueue {
                key: key.to_string(),
                reason: format!(
                    "partition {} out of range, queue has {}",
                    partition, metadata.partitions
                ),
            });
        }
        Ok(self.partition_info(&key, &metadata, partition))
    }

    /// Resolve an entity, fanning out to every partition when the queue
    /// duplicates messages to all partitions.
    ///
    /// The first entry is the one [`resolve`](Self::resolve) returns; fan-out
    /// copies follow in partition order with `primary` unset.
    pub fn resolve_all(
        &self,
        queue_type: QueueType,
        queue_name: Option<&str>,
        tenant_id: TenantId,
        entity_id: &EntityId,
    ) -> Result<Vec<TopicPartitionInfo>> {
        let (key, metadata) = self.resolve_queue(queue_type, queue_name, tenant_id)?;
        let primary = partition_for(self.hash.hash_entity(entity_id), metadata.partitions);

        let mut result = vec![self.partition_info(&key, &metadata, primary)];
        if metadata.duplicate_to_all_partitions {
            result.extend(
                (0..metadata.partitions)
                    .filter(|&p| p != primary)
                    .map(|p| self.partition_info(&key, &metadata, p).with_primary(false)),
            );
        }
        Ok(result)
    }

    /// Whether this node owns the partition an entity resolves to.
    ///
    /// Resolution errors, an unknown tenant included, answer `false`.
    pub fn is_mine(
        &self,
        queue_type: QueueType,
        queue_name: Option<&str>,
        tenant_id: TenantId,
        entity_id: &EntityId,
    ) -> bool {
        match self.resolve(queue_type, queue_name, tenant_id, entity_id) {
            Ok(info) => info.my_partition,
            Err(e) => {
                tracing::debug!(tenant_id = %tenant_id, error = %e, "Treating unresolvable entity as not mine");
                false
            }
        }
    }

    /// Whether this node owns the system partition of a queue type.
    pub fn is_system_partition_mine(&self, queue_type: QueueType) -> bool {
        self.is_mine(
            queue_type,
            None,
            TenantId::SYSTEM,
            &EntityId::from(TenantId::SYSTEM),
        )
    }

    /// Partitions of a queue owned by this node, ascending.
    pub fn my_partitions(&self, key: &QueueKey) -> Vec<u32> {
        self.engine.ownership().partitions(key)
    }

    /// Topic of a registered queue.
    pub fn topic(&self, key: &QueueKey) -> Option<String> {
        self.registry.get(key).map(|m| m.topic)
    }

    /// Owners of one partition as of the last recomputation.
    pub fn owners(&self, key: &QueueKey, partition: u32) -> Vec<ServiceId> {
        self.engine.assignment().owners(key, partition).to_vec()
    }

    /// Per-service notification topic.
    pub fn notifications_topic(&self, queue_type: QueueType, service_id: &str) -> TopicPartitionInfo {
        TopicPartitionInfo::unpartitioned(format!(
            "{}.{}.{}",
            self.config.notifications_prefix,
            queue_type.as_str(),
            service_id
        ))
    }

    /// Find the registered queue a request maps to.
    fn resolve_queue(
        &self,
        queue_type: QueueType,
        queue_name: Option<&str>,
        tenant_id: TenantId,
    ) -> Result<(QueueKey, QueueMetadata)> {
        let isolated = if queue_type.supports_tenant_isolation() {
            self.tenants.is_isolated(tenant_id).inspect_err(|e| {
                if e.is_tenant_not_found() {
                    self.metrics.tenant_not_found.inc();
                    tracing::warn!(tenant_id = %tenant_id, queue_type = %queue_type, "Tenant not found during resolution");
                }
            })?
        } else {
            false
        };
        let effective = if isolated { tenant_id } else { TenantId::SYSTEM };

        let requested = QueueKey::named(queue_type, queue_name, effective);
        let registry = self.registry.snapshot();
        if let Some(metadata) = registry.get(&requested) {
            return Ok((requested, metadata.clone()));
        }

        let mut fallbacks = Vec::with_capacity(3);
        if !effective.is_system() && !requested.is_main() {
            fallbacks.push(requested.with_queue_name(MAIN_QUEUE_NAME));
        }
        if !effective.is_system() {
            fallbacks.push(requested.with_tenant(TenantId::SYSTEM));
        }
        fallbacks.push(QueueKey::main(queue_type));
        fallbacks.dedup();

        self.metrics.record_fallback(queue_type.as_str());
        for fallback in fallbacks {
            tracing::warn!(
                requested = %requested,
                fallback = %fallback,
                "Queue not registered, falling back"
            );
            if let Some(metadata) = registry.get(&fallback) {
                return Ok((fallback, metadata.clone()));
            }
        }

        Err(Error::QueueNotFound(requested.to_string()))
    }

    fn partition_info(&self, key: &QueueKey, metadata: &QueueMetadata, partition: u32) -> TopicPartitionInfo {
        let tenant_id = (!key.is_system()).then_some(key.tenant_id);
        let mine = self.engine.ownership().owns(key, partition);
        TopicPartitionInfo::new(metadata.topic.clone(), tenant_id, Some(partition), mine)
    }

    // ---- membership queries ----

    /// Ids of all members serving a queue type, this node included.
    pub fn all_service_ids(&self, queue_type: QueueType) -> BTreeSet<ServiceId> {
        self.all_services(queue_type)
            .into_iter()
            .map(|m| m.service_id)
            .collect()
    }

    /// All members serving a queue type, this node included.
    pub fn all_services(&self, queue_type: QueueType) -> Vec<MemberDescriptor> {
        self.membership()
            .all_members()
            .into_iter()
            .filter(|m| m.serves(queue_type))
            .collect()
    }

    /// Members exposing a transport.
    pub fn count_transports(&self, transport: &str) -> usize {
        self.membership()
            .all_members()
            .iter()
            .filter(|m| m.transports.iter().any(|t| t == transport))
            .count()
    }

    /// Whether this node handles rule-engine work of a tenant.
    ///
    /// Members that do not run the rule engine, and every member when no
    /// one is dedicated to a profile, answer `true`. Otherwise isolated
    /// tenants belong to the members dedicated to their profile (or the
    /// regular pool when there are none), and the rest to the regular pool.
    pub fn is_managed_by_current_service(&self, tenant_id: TenantId) -> bool {
        let membership = self.membership();
        let Some(this) = membership.this.as_ref() else {
            return false;
        };
        if !this.serves(QueueType::RuleEngine) {
            return true;
        }
        let assignment = self.engine.assignment();
        let responsible = assignment.responsible();
        if !responsible.isolation_in_use() {
            return true;
        }

        let info = if tenant_id.is_system() {
            None
        } else {
            match self.tenants.routing_info(tenant_id) {
                Ok(info) => Some(info),
                Err(e) => {
                    if e.is_tenant_not_found() {
                        self.metrics.tenant_not_found.inc();
                    }
                    tracing::warn!(tenant_id = %tenant_id, error = %e, "Cannot tell whether tenant is managed here");
                    return false;
                }
            }
        };

        match info.filter(|info| info.isolated) {
            Some(info) => {
                let dedicated = responsible.dedicated_to(&info.profile_id);
                if dedicated.is_empty() {
                    !this.is_dedicated()
                } else {
                    dedicated.contains(&this.service_id)
                }
            }
            None => !this.is_dedicated(),
        }
    }

    // ---- registry and tenant feeds ----

    /// Apply a batch of queue updates and recompute.
    ///
    /// An invalid entry rejects the whole batch.
    pub fn apply_queue_updates(&self, updates: &[QueueUpdate]) -> Result<Vec<QueueKey>> {
        let keys = self.registry.apply_updates(updates)?;
        self.recalculate_current();
        Ok(keys)
    }

    /// Apply a batch of queue deletions and recompute.
    pub fn apply_queue_deletes(&self, deletes: &[QueueDelete]) -> Vec<QueueKey> {
        let keys = self.registry.apply_deletes(deletes);
        if !keys.is_empty() {
            self.recalculate_current();
        }
        keys
    }

    /// Forget a removed tenant: its cache entry and all its queues.
    pub fn remove_tenant(&self, tenant_id: TenantId) -> Vec<QueueKey> {
        self.tenants.evict(tenant_id);
        let keys = self.registry.remove_tenant(tenant_id);
        tracing::info!(tenant_id = %tenant_id, queues = keys.len(), "Tenant removed");
        if !keys.is_empty() {
            self.recalculate_current();
        }
        keys
    }

    /// Refresh a tenant whose profile or isolation may have changed.
    pub fn on_tenant_updated(&self, tenant_id: TenantId) {
        if self.tenants.evict(tenant_id) {
            tracing::debug!(tenant_id = %tenant_id, "Tenant routing info evicted");
            self.recalculate_current();
        }
    }

    /// Recompute with the membership of the last recomputation, if any.
    fn recalculate_current(&self) -> Option<RecalculationOutcome> {
        self.engine.recalculate_current()
    }
}

impl PartitionRecalculator for PartitionService {
    fn recalculate(&self, this: &MemberDescriptor, peers: &[MemberDescriptor]) {
        self.engine.recalculate(this, peers);
    }
}

impl std::fmt::Debug for PartitionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionService")
            .field("hash", &self.hash)
            .field("queues", &self.registry.len())
            .field("engine", &self.engine)
            .finish()
    }
}
