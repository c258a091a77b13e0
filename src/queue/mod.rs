//! Queue keys and the queue metadata registry.

mod key;
mod registry;

pub use key::{
    QueueDelete, QueueKey, QueueMetadata, QueueUpdate, EVENTS_QUEUE_NAME, MAIN_QUEUE_NAME,
    STATES_QUEUE_NAME,
};
pub use registry::{QueueRegistry, RegistrySnapshot};
