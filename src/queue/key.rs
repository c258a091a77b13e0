//! Queue identity and metadata.

use crate::types::{QueueType, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the default queue of every queue type.
pub const MAIN_QUEUE_NAME: &str = "Main";

/// Name of the rule-engine event companion queue.
pub const EVENTS_QUEUE_NAME: &str = "Events";

/// Name of the rule-engine state companion queue.
pub const STATES_QUEUE_NAME: &str = "States";

/// Identity of a logical queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    /// Worker category.
    pub queue_type: QueueType,
    /// Queue name, [`MAIN_QUEUE_NAME`] when unspecified.
    pub queue_name: String,
    /// Owning tenant; [`TenantId::SYSTEM`] for shared queues.
    pub tenant_id: TenantId,
}

impl QueueKey {
    /// Create a queue key.
    pub fn new(queue_type: QueueType, queue_name: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            queue_type,
            queue_name: queue_name.into(),
            tenant_id,
        }
    }

    /// The system "main" queue of a type.
    pub fn main(queue_type: QueueType) -> Self {
        Self::new(queue_type, MAIN_QUEUE_NAME, TenantId::SYSTEM)
    }

    /// Build a key from an optional queue name, defaulting to "main".
    pub fn named(queue_type: QueueType, queue_name: Option<&str>, tenant_id: TenantId) -> Self {
        let name = match queue_name {
            Some(name) if !name.is_empty() => name,
            _ => MAIN_QUEUE_NAME,
        };
        Self::new(queue_type, name, tenant_id)
    }

    /// Same key with another tenant.
    pub fn with_tenant(&self, tenant_id: TenantId) -> Self {
        Self::new(self.queue_type, self.queue_name.clone(), tenant_id)
    }

    /// Same key with another queue name.
    pub fn with_queue_name(&self, queue_name: impl Into<String>) -> Self {
        Self::new(self.queue_type, queue_name, self.tenant_id)
    }

    /// Whether this is the "main" queue of its tenant.
    pub fn is_main(&self) -> bool {
        self.queue_name == MAIN_QUEUE_NAME
    }

    /// Whether this key belongs to the system tenant.
    pub fn is_system(&self) -> bool {
        self.tenant_id.is_system()
    }

    /// Companion keys that mirror this key's partition count.
    ///
    /// Only the rule-engine "main" queue has companions.
    pub fn companions(&self) -> Vec<QueueKey> {
        if self.queue_type == QueueType::RuleEngine && self.is_main() {
            vec![
                self.with_queue_name(EVENTS_QUEUE_NAME),
                self.with_queue_name(STATES_QUEUE_NAME),
            ]
        } else {
            Vec::new()
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/", self.queue_type, self.queue_name)?;
        if self.tenant_id.is_system() {
            f.write_str("system")
        } else {
            write!(f, "{}", self.tenant_id)
        }
    }
}

/// Topic and partition layout registered for a queue key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetadata {
    /// Topic name.
    pub topic: String,
    /// Partition count, always at least 1.
    pub partitions: u32,
    /// Whether some messages are fanned out to every partition.
    pub duplicate_to_all_partitions: bool,
}

impl QueueMetadata {
    /// Create queue metadata.
    pub fn new(topic: impl Into<String>, partitions: u32) -> Self {
        Self {
            topic: topic.into(),
            partitions,
            duplicate_to_all_partitions: false,
        }
    }

    /// Enable fan-out to all partitions.
    pub fn with_duplicate_to_all_partitions(mut self, duplicate: bool) -> Self {
        self.duplicate_to_all_partitions = duplicate;
        self
    }
}

/// A rule-engine queue create/update from the queue metadata feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueUpdate {
    pub tenant_id: TenantId,
    pub queue_name: String,
    pub topic: String,
    pub partitions: u32,
    pub duplicate_msg_to_all_partitions: bool,
}

impl QueueUpdate {
    /// Key this update targets.
    pub fn key(&self) -> QueueKey {
        QueueKey::new(QueueType::RuleEngine, self.queue_name.clone(), self.tenant_id)
    }
}

/// A rule-engine queue deletion from the queue metadata feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDelete {
    pub tenant_id: TenantId,
    pub queue_name: String,
}

impl QueueDelete {
    /// Key this deletion targets.
    pub fn key(&self) -> QueueKey {
        QueueKey::new(QueueType::RuleEngine, self.queue_name.clone(), self.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_defaults_to_main() {
        let tenant = TenantId::random();
        assert_eq!(
            QueueKey::named(QueueType::Core, None, tenant).queue_name,
            MAIN_QUEUE_NAME
        );
        assert_eq!(
            QueueKey::named(QueueType::Core, Some(""), tenant).queue_name,
            MAIN_QUEUE_NAME
        );
        assert_eq!(
            QueueKey::named(QueueType::Core, Some("HighPriority"), tenant).queue_name,
            "HighPriority"
        );
    }

    #[test]
    fn test_companions_only_for_rule_engine_main() {
        let main = QueueKey::main(QueueType::RuleEngine);
        let names: Vec<_> = main.companions().into_iter().map(|k| k.queue_name).collect();
        assert_eq!(names, vec![EVENTS_QUEUE_NAME, STATES_QUEUE_NAME]);

        assert!(main.with_queue_name("HighPriority").companions().is_empty());
        assert!(QueueKey::main(QueueType::Core).companions().is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            QueueKey::main(QueueType::RuleEngine).to_string(),
            "tb-rule-engine/Main/system"
        );
    }
}
