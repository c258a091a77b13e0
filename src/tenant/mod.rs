//! Tenant routing cache.
//!
//! Remembers, per tenant, whether its rule-engine traffic is isolated and
//! which profile it belongs to. Entries are loaded lazily from a
//! [`TenantInfoProvider`] and live until evicted.

use crate::error::{Error, Result};
use crate::types::{TenantId, TenantProfileId};
use dashmap::DashMap;
use std::sync::Arc;

/// Routing-relevant facts about a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantRoutingInfo {
    pub tenant_id: TenantId,
    pub profile_id: TenantProfileId,
    /// Whether the tenant gets dedicated rule-engine queues.
    pub isolated: bool,
}

impl TenantRoutingInfo {
    /// Create routing info.
    pub fn new(tenant_id: TenantId, profile_id: TenantProfileId, isolated: bool) -> Self {
        Self {
            tenant_id,
            profile_id,
            isolated,
        }
    }
}

/// External source of tenant routing info.
pub trait TenantInfoProvider: Send + Sync + 'static {
    /// Look up a tenant. `None` means the tenant does not exist.
    fn tenant_routing_info(&self, tenant_id: TenantId) -> Option<TenantRoutingInfo>;
}

/// Memoizing cache in front of a [`TenantInfoProvider`].
pub struct TenantRoutingCache {
    provider: Arc<dyn TenantInfoProvider>,
    entries: DashMap<TenantId, TenantRoutingInfo>,
}

impl TenantRoutingCache {
    /// Create a cache over a provider.
    pub fn new(provider: Arc<dyn TenantInfoProvider>) -> Self {
        Self {
            provider,
            entries: DashMap::new(),
        }
    }

    /// Routing info of a real tenant, loading it on a miss.
    pub fn routing_info(&self, tenant_id: TenantId) -> Result<TenantRoutingInfo> {
        if let Some(info) = self.entries.get(&tenant_id) {
            return Ok(*info);
        }

        let info = self
            .provider
            .tenant_routing_info(tenant_id)
            .ok_or(Error::TenantNotFound(tenant_id))?;
        self.entries.insert(tenant_id, info);
        tracing::trace!(tenant_id = %tenant_id, isolated = info.isolated, "Cached tenant routing info");
        Ok(info)
    }

    /// Cached routing info, without consulting the provider.
    pub fn cached(&self, tenant_id: TenantId) -> Option<TenantRoutingInfo> {
        self.entries.get(&tenant_id).map(|info| *info)
    }

    /// Load every given tenant not cached yet. Unknown tenants stay uncached.
    pub fn prefetch(&self, tenant_ids: impl IntoIterator<Item = TenantId>) {
        for tenant_id in tenant_ids {
            if tenant_id.is_system() || self.entries.contains_key(&tenant_id) {
                continue;
            }
            if let Err(e) = self.routing_info(tenant_id) {
                tracing::debug!(tenant_id = %tenant_id, error = %e, "Tenant prefetch failed");
            }
        }
    }

    /// Whether a tenant is isolated. The system tenant never is and never
    /// triggers a lookup.
    pub fn is_isolated(&self, tenant_id: TenantId) -> Result<bool> {
        if tenant_id.is_system() {
            return Ok(false);
        }
        self.routing_info(tenant_id).map(|info| info.isolated)
    }

    /// Profile of a tenant.
    pub fn profile_of(&self, tenant_id: TenantId) -> Result<TenantProfileId> {
        self.routing_info(tenant_id).map(|info| info.profile_id)
    }

    /// Drop a tenant's cached entry. Returns whether one was present.
    pub fn evict(&self, tenant_id: TenantId) -> bool {
        self.entries.remove(&tenant_id).is_some()
    }

    /// Number of cached tenants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TenantRoutingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRoutingCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
