//! Discovery adapters.
//!
//! A discovery adapter supplies membership snapshots to a
//! [`PartitionRecalculator`], normally the partition service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    PartitionService                              │
//! │            (implements PartitionRecalculator)                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                               ▲
//!                               │ recalculate(this, peers)
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  DiscoveryService Trait                          │
//! └─────────────────────────────────────────────────────────────────┘
//!           │                                        │
//!           ▼                                        ▼
//! ┌──────────────────────┐              ┌──────────────────────────┐
//! │ SingleNodeDiscovery  │              │ CoordinatedDiscovery<B>  │
//! │ (no peers)           │              │ (B: CoordinationBackend) │
//! └──────────────────────┘              └──────────────────────────┘
//! ```

use crate::cluster::membership::{LocalService, MemberDescriptor};
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Receiver of membership snapshots.
pub trait PartitionRecalculator: Send + Sync + 'static {
    /// Recompute ownership for `this` node given the live peers.
    fn recalculate(&self, this: &MemberDescriptor, peers: &[MemberDescriptor]);
}

/// Trait for discovery adapters.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Publish this node and trigger the initial recomputation.
    async fn start(&mut self) -> Result<()>;

    /// Stop discovery. Ownership is left as last computed.
    async fn shutdown(&mut self) -> Result<()>;

    /// Whether this deployment is a single node.
    fn is_monolith(&self) -> bool;

    /// Whether `start` has completed and `shutdown` has not.
    fn is_started(&self) -> bool;

    /// Last known live peers, this node excluded.
    fn peers(&self) -> Vec<MemberDescriptor>;
}

/// Discovery for single-node deployments: recomputes once with no peers.
pub struct SingleNodeDiscovery {
    local: Arc<LocalService>,
    recalculator: Arc<dyn PartitionRecalculator>,
    started: bool,
}

impl SingleNodeDiscovery {
    pub fn new(local: Arc<LocalService>, recalculator: Arc<dyn PartitionRecalculator>) -> Self {
        Self {
            local,
            recalculator,
            started: false,
        }
    }
}

#[async_trait]
impl DiscoveryService for SingleNodeDiscovery {
    async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let this = self.local.descriptor();
        tracing::info!(service_id = %this.service_id, "Starting single-node discovery");
        self.recalculator.recalculate(&this, &[]);
        self.started = true;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Err(DiscoveryError::NotStarted.into());
        }
        self.started = false;
        tracing::info!(service_id = %self.local.service_id(), "Single-node discovery stopped");
        Ok(())
    }

    fn is_monolith(&self) -> bool {
        true
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn peers(&self) -> Vec<MemberDescriptor> {
        Vec::new()
    }
}

impl std::fmt::Debug for SingleNodeDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleNodeDiscovery")
            .field("service_id", &self.local.service_id())
            .field("started", &self.started)
            .finish()
    }
}
