//! Cluster member descriptors and the membership snapshot.
//!
//! Descriptors are replaced wholesale whenever discovery reports a change;
//! nothing mutates a published descriptor in place. The tracker keeps the
//! last snapshot the assignment engine computed from, so resolver reads
//! of the member list never block.

use crate::error::Result;
use crate::types::{QueueType, ServiceId, TenantProfileId};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resource usage reported by a member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub cpu_usage_pct: u8,
    pub memory_usage_pct: u8,
    pub disk_usage_pct: u8,
    pub total_memory_bytes: u64,
}

/// What a cluster member declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub service_id: ServiceId,
    /// Queue types this member consumes.
    pub queue_types: Vec<QueueType>,
    /// Replica-set label for label-grouped queue types.
    pub label: Option<String>,
    /// Tenant profiles this member is dedicated to.
    pub assigned_tenant_profiles: Vec<TenantProfileId>,
    /// Transport kinds hosted by this member (mqtt, http, coap, ...).
    pub transports: Vec<String>,
    /// Background task types this member executes.
    pub task_types: Vec<String>,
    pub ready: bool,
    pub load: SystemLoad,
}

impl MemberDescriptor {
    /// Create a descriptor that declares nothing yet.
    pub fn new(service_id: impl Into<ServiceId>) -> Self {
        Self {
            service_id: service_id.into(),
            queue_types: Vec::new(),
            label: None,
            assigned_tenant_profiles: Vec::new(),
            transports: Vec::new(),
            task_types: Vec::new(),
            ready: true,
            load: SystemLoad::default(),
        }
    }

    pub fn with_queue_types(mut self, queue_types: impl IntoIterator<Item = QueueType>) -> Self {
        self.queue_types = queue_types.into_iter().collect();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_tenant_profiles(
        mut self,
        profiles: impl IntoIterator<Item = TenantProfileId>,
    ) -> Self {
        self.assigned_tenant_profiles = profiles.into_iter().collect();
        self
    }

    pub fn with_transports<S: Into<String>>(mut self, transports: impl IntoIterator<Item = S>) -> Self {
        self.transports = transports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_task_types<S: Into<String>>(mut self, task_types: impl IntoIterator<Item = S>) -> Self {
        self.task_types = task_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Whether the member consumes a queue type.
    pub fn serves(&self, queue_type: QueueType) -> bool {
        self.queue_types.contains(&queue_type)
    }

    /// Whether the member is dedicated to at least one tenant profile.
    pub fn is_dedicated(&self) -> bool {
        !self.assigned_tenant_profiles.is_empty()
    }

    /// Whether two descriptors would produce the same assignment.
    ///
    /// Readiness and load are carried but do not take part in owner
    /// selection.
    pub fn same_routing(&self, other: &MemberDescriptor) -> bool {
        self.service_id == other.service_id
            && self.queue_types == other.queue_types
            && self.label == other.label
            && self.assigned_tenant_profiles == other.assigned_tenant_profiles
            && self.transports == other.transports
            && self.task_types == other.task_types
    }

    /// Encode for publishing through a coordination backend.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a published descriptor.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// This node's own descriptor. Readiness and load may change at runtime and
/// are picked up on the next publish.
#[derive(Debug)]
pub struct LocalService {
    descriptor: RwLock<MemberDescriptor>,
}

impl LocalService {
    pub fn new(descriptor: MemberDescriptor) -> Self {
        Self {
            descriptor: RwLock::new(descriptor),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.descriptor.read().service_id.clone()
    }

    /// Copy of the current descriptor.
    pub fn descriptor(&self) -> MemberDescriptor {
        self.descriptor.read().clone()
    }

    pub fn set_ready(&self, ready: bool) {
        self.descriptor.write().ready = ready;
    }

    pub fn set_load(&self, load: SystemLoad) {
        self.descriptor.write().load = load;
    }
}

/// Members seen by one recomputation.
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    /// This node; `None` before the first recomputation.
    pub this: Option<MemberDescriptor>,
    /// Other members, sorted by service id.
    pub peers: Vec<MemberDescriptor>,
}

impl MembershipSnapshot {
    /// Self followed by peers.
    pub fn all_members(&self) -> Vec<MemberDescriptor> {
        self.this.iter().chain(self.peers.iter()).cloned().collect()
    }
}

/// Holds the last-known membership snapshot.
#[derive(Debug)]
pub struct MembershipTracker {
    current: ArcSwap<MembershipSnapshot>,
}

impl Default for MembershipTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(MembershipSnapshot::default()),
        }
    }

    /// Publish a new snapshot. Peers with this node's id are dropped.
    pub fn update(&self, this: MemberDescriptor, peers: &[MemberDescriptor]) -> Arc<MembershipSnapshot> {
        let mut peers: Vec<MemberDescriptor> = peers
            .iter()
            .filter(|p| p.service_id != this.service_id)
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        peers.dedup_by(|a, b| a.service_id == b.service_id);

        let snapshot = Arc::new(MembershipSnapshot {
            this: Some(this),
            peers,
        });
        self.current.store(snapshot.clone());
        snapshot
    }

    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        self.current.load_full()
    }

    pub fn this(&self) -> Option<MemberDescriptor> {
        self.current.load().this.clone()
    }

    pub fn peers(&self) -> Vec<MemberDescriptor> {
        self.current.load().peers.clone()
    }

    pub fn all_members(&self) -> Vec<MemberDescriptor> {
        self.current.load().all_members()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_bytes() {
        let descriptor = MemberDescriptor::new("tb-rule-engine-0")
            .with_queue_types([QueueType::RuleEngine, QueueType::Core])
            .with_label("zone-a")
            .with_transports(["mqtt"]);

        let decoded = MemberDescriptor::from_bytes(&descriptor.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, descriptor);
        assert!(MemberDescriptor::from_bytes(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_same_routing_ignores_load() {
        let a = MemberDescriptor::new("a").with_queue_types([QueueType::Core]);
        let mut b = a.clone().with_ready(false);
        b.load.cpu_usage_pct = 90;
        assert!(a.same_routing(&b));
        assert!(!a.same_routing(&b.with_label("x")));
    }

    #[test]
    fn test_tracker_excludes_self_from_peers() {
        let tracker = MembershipTracker::new();
        assert!(tracker.this().is_none());

        let this = MemberDescriptor::new("b");
        let peers = vec![
            MemberDescriptor::new("c"),
            MemberDescriptor::new("b"),
            MemberDescriptor::new("a"),
        ];
        tracker.update(this, &peers);

        let ids: Vec<_> = tracker.peers().into_iter().map(|p| p.service_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(tracker.all_members().len(), 3);
    }

    #[test]
    fn test_local_service_updates() {
        let local = LocalService::new(MemberDescriptor::new("a"));
        local.set_ready(false);
        local.set_load(SystemLoad {
            cpu_usage_pct: 12,
            ..Default::default()
        });
        let descriptor = local.descriptor();
        assert!(!descriptor.ready);
        assert_eq!(descriptor.load.cpu_usage_pct, 12);
    }
}
