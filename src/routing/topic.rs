//! Resolver output values.

use crate::types::TenantId;
use std::fmt;

/// A resolved topic partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartitionInfo {
    pub topic: String,
    /// Set for isolated (non-system) queues.
    pub tenant_id: Option<TenantId>,
    /// `None` for unpartitioned topics.
    pub partition: Option<u32>,
    /// Whether this node currently owns the partition.
    pub my_partition: bool,
    /// The partition the entity hashes to, as opposed to a fan-out copy.
    pub primary: bool,
}

impl TopicPartitionInfo {
    pub fn new(
        topic: impl Into<String>,
        tenant_id: Option<TenantId>,
        partition: Option<u32>,
        my_partition: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            tenant_id,
            partition,
            my_partition,
            primary: true,
        }
    }

    /// A single-partition topic with no tenant.
    pub fn unpartitioned(topic: impl Into<String>) -> Self {
        Self::new(topic, None, None, true)
    }

    pub(crate) fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    /// `<topic>.<partition>`, or the bare topic when unpartitioned.
    pub fn full_topic_name(&self) -> String {
        match self.partition {
            Some(partition) => format!("{}.{}", self.topic, partition),
            None => self.topic.clone(),
        }
    }
}

impl fmt::Display for TopicPartitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_topic_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_topic_name() {
        let info = TopicPartitionInfo::new("tb_core", None, Some(3), false);
        assert_eq!(info.full_topic_name(), "tb_core.3");
        assert_eq!(
            TopicPartitionInfo::unpartitioned("notifications.tb-core.node-1").full_topic_name(),
            "notifications.tb-core.node-1"
        );
    }
}
