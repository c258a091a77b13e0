//! Deterministic partition assignment and topic routing.
//!
//! This crate decides, on every node of a cluster of queue consumers, which
//! partitions of which queues the node owns, and routes outgoing messages to
//! the right topic partition. It uses:
//! - **Immutable snapshots** (arc-swap) for the queue registry, membership
//!   and ownership, so routing reads never wait on a recomputation
//! - **Pure owner selection** over sorted members, so every node reaches
//!   the same answer from the same view without a coordinator
//! - **Pluggable discovery** (single node, or any coordination backend)
//!
//! # Features
//!
//! - Per-tenant rule-engine queues with profile-dedicated members
//! - Three owner strategies: tenant-hash pick, label groups, round robin
//! - Batched queue updates applied atomically
//! - One change event per queue type, plus topology-only events
//! - Leave debouncing and reconnect handling in coordinated discovery
//!
//! # Example
//!
//! ```rust
//! use partition_router::testing::InMemoryTenantProvider;
//! use partition_router::{
//!     EntityId, MemberDescriptor, PartitionConfig, PartitionService, QueueType, TenantId,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> partition_router::Result<()> {
//! let config = PartitionConfig::default().with_partitions(QueueType::Core, 12);
//! let service = PartitionService::new(config, Arc::new(InMemoryTenantProvider::new()))?;
//!
//! let this = MemberDescriptor::new("tb-core-0").with_queue_types([QueueType::Core]);
//! service.recalculate(&this, &[]);
//!
//! let tpi = service.resolve(QueueType::Core, None, TenantId::SYSTEM, &EntityId::random())?;
//! assert!(tpi.my_partition);
//! println!("publish to {}", tpi.full_topic_name());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Producers / Consumers             │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │          PartitionService API               │
//! │  • resolve / resolve_all / is_mine          │
//! │  • my_partitions(key)                       │
//! │  • apply_queue_updates / remove_tenant      │
//! └─────────────────────────────────────────────┘
//!          │               │               ▲
//!          ▼               ▼               │ recalculate(this, peers)
//! ┌──────────────┐ ┌───────────────┐ ┌─────────────────┐
//! │QueueRegistry │ │AssignmentEngine│ │DiscoveryService │
//! │TenantCache   │ │ → ChangeNotifier│ │                 │
//! └──────────────┘ └───────────────┘ └─────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Ownership**: computed locally; nodes agree once they see the same
//!   membership and registry
//! - **Reads**: see either the previous or the new snapshot, never a mix
//! - **Disconnects**: the last computed ownership stays in force

pub mod cluster;
pub mod config;
pub mod error;
pub mod hashing;
pub mod metrics;
pub mod partitioning;
pub mod queue;
pub mod routing;
pub mod tenant;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::{CompanionTopics, DiscoveryConfig, PartitionConfig, QueueSettings};
pub use error::{DiscoveryError, Error, Result};
pub use hashing::HashFunction;
pub use routing::{PartitionService, TopicPartitionInfo};
pub use types::{EntityId, QueueType, ServiceId, TenantId, TenantProfileId};

// Re-export cluster types
pub use cluster::{
    ChangeNotifier, CoordinatedDiscovery, CoordinationBackend, DiscoveryService, LocalService,
    MemberDescriptor, PartitionChangeEvent, SingleNodeDiscovery, TopologyChangeEvent,
};

// Re-export registry and tenant types
pub use queue::{QueueDelete, QueueKey, QueueMetadata, QueueRegistry, QueueUpdate};
pub use tenant::{TenantInfoProvider, TenantRoutingCache, TenantRoutingInfo};
