//! Testing utilities for partition routing.
//!
//! This module provides in-memory stand-ins for the external systems a
//! partition service talks to:
//! - [`InMemoryTenantProvider`] for tenant routing info
//! - [`InMemoryCoordinator`] as a coordination backend hub
//! - [`RecordingRecalculator`] to observe what discovery reports
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     InMemoryCoordinator                          │
//! │   registrations + watchers, reachable flag, session expiry       │
//! └─────────────────────────────────────────────────────────────────┘
//!        │ session("a")            │ session("b")          ▲
//!        ▼                         ▼                       │ join_external
//! ┌───────────────┐        ┌───────────────┐               │ leave_external
//! │InMemoryBackend│        │InMemoryBackend│           test code
//! └───────────────┘        └───────────────┘
//!        │                         │
//!        ▼                         ▼
//!  CoordinatedDiscovery     CoordinatedDiscovery
//! ```
//!
//! # Example
//!
//! ```rust
//! use partition_router::testing::{member, InMemoryCoordinator};
//! use partition_router::types::QueueType;
//!
//! let hub = InMemoryCoordinator::new();
//! hub.join_external(&member("tb-core-1", &[QueueType::Core]));
//! assert_eq!(hub.registered(), vec!["tb-core-1".to_string()]);
//! ```

mod coordinator;

mod assignment_scenarios_tests;
mod resolver_tests;

pub use coordinator::{InMemoryBackend, InMemoryCoordinator};

use crate::cluster::{MemberDescriptor, PartitionRecalculator};
use crate::tenant::{TenantInfoProvider, TenantRoutingInfo};
use crate::types::{QueueType, TenantId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// A ready member serving the given queue types.
pub fn member(service_id: &str, queue_types: &[QueueType]) -> MemberDescriptor {
    MemberDescriptor::new(service_id)
        .with_queue_types(queue_types.iter().copied())
        .with_ready(true)
}

/// Tenant provider backed by a map. Counts lookups.
#[derive(Debug, Default)]
pub struct InMemoryTenantProvider {
    tenants: RwLock<HashMap<TenantId, TenantRoutingInfo>>,
    lookups: AtomicUsize,
}

impl InMemoryTenantProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tenant.
    pub fn insert(&self, info: TenantRoutingInfo) {
        self.tenants.write().insert(info.tenant_id, info);
    }

    pub fn remove(&self, tenant_id: TenantId) {
        self.tenants.write().remove(&tenant_id);
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl TenantInfoProvider for InMemoryTenantProvider {
    fn tenant_routing_info(&self, tenant_id: TenantId) -> Option<TenantRoutingInfo> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.tenants.read().get(&tenant_id).copied()
    }
}

/// Recalculator that records every membership snapshot it receives.
#[derive(Debug, Default)]
pub struct RecordingRecalculator {
    calls: Mutex<Vec<(MemberDescriptor, Vec<MemberDescriptor>)>>,
    notify: Notify,
}

impl RecordingRecalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(MemberDescriptor, Vec<MemberDescriptor>)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Peer ids of the most recent call.
    pub fn last_peer_ids(&self) -> Option<Vec<String>> {
        self.calls
            .lock()
            .last()
            .map(|(_, peers)| peers.iter().map(|p| p.service_id.clone()).collect())
    }

    /// Wait until at least `count` calls were recorded.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl PartitionRecalculator for RecordingRecalculator {
    fn recalculate(&self, this: &MemberDescriptor, peers: &[MemberDescriptor]) {
        self.calls.lock().push((this.clone(), peers.to_vec()));
        self.notify.notify_waiters();
    }
}
