//! Message routing: resolving entities to topic partitions.

mod service;
mod topic;

pub use service::PartitionService;
pub use topic::TopicPartitionInfo;
