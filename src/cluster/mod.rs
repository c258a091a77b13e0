//! Cluster membership, discovery and change notification.

pub mod coordinated;
pub mod discovery;
pub mod events;
pub mod membership;

pub use coordinated::{BackendEvent, BackendResult, CoordinatedDiscovery, CoordinationBackend};
pub use discovery::{DiscoveryService, PartitionRecalculator, SingleNodeDiscovery};
pub use events::{
    ChangeNotifier, PartitionChangeEvent, PartitionEventReceiver, TopologyChangeEvent,
    DEFAULT_EVENT_CAPACITY,
};
pub use membership::{
    LocalService, MemberDescriptor, MembershipSnapshot, MembershipTracker, SystemLoad,
};
