//! Configuration types for partition routing.

use crate::error::{Error, Result};
use crate::hashing::{HashFunction, DEFAULT_HASH_FUNCTION};
use crate::types::QueueType;
use std::str::FromStr;
use std::time::Duration;

/// Topic and partition count of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Topic name.
    pub topic: String,
    /// Number of partitions. Must be at least 1.
    pub partitions: u32,
}

impl QueueSettings {
    /// Create queue settings.
    pub fn new(topic: impl Into<String>, partitions: u32) -> Self {
        Self {
            topic: topic.into(),
            partitions,
        }
    }
}

/// Fixed topic names of the rule-engine companion queues.
///
/// Companions mirror the partition count of the "main" rule-engine queue of
/// the same tenant but keep these topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionTopics {
    /// Topic of the event companion queue.
    pub events_topic: String,
    /// Topic of the state companion queue.
    pub states_topic: String,
}

impl Default for CompanionTopics {
    fn default() -> Self {
        Self {
            events_topic: "tb_rule_engine.events".to_string(),
            states_topic: "tb_rule_engine.states".to_string(),
        }
    }
}

/// Main configuration for partition routing.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Name of the hash function (`murmur3_32`, `murmur3_128`, `sha256`, `xxhash64`).
    pub hash_function: String,

    /// Default core queue.
    pub core: QueueSettings,

    /// Default (system, "main") rule-engine queue.
    pub rule_engine: QueueSettings,

    /// Default version-control queue.
    pub version_control: QueueSettings,

    /// Default event-query queue.
    pub event_query: QueueSettings,

    /// Default task-processor queue.
    pub task_processor: QueueSettings,

    /// Rule-engine companion topics.
    pub companion: CompanionTopics,

    /// Base name of per-service notification topics.
    pub notifications_prefix: String,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            hash_function: DEFAULT_HASH_FUNCTION.to_string(),
            core: QueueSettings::new("tb_core", 10),
            rule_engine: QueueSettings::new("tb_rule_engine.main", 10),
            version_control: QueueSettings::new("tb_version_control", 10),
            event_query: QueueSettings::new("edqs.events", 12),
            task_processor: QueueSettings::new("tasks", 10),
            companion: CompanionTopics::default(),
            notifications_prefix: "notifications".to_string(),
        }
    }
}

impl PartitionConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hash function by name.
    pub fn with_hash_function(mut self, name: impl Into<String>) -> Self {
        self.hash_function = name.into();
        self
    }

    /// Set the default queue of a queue type.
    pub fn with_queue(mut self, queue_type: QueueType, settings: QueueSettings) -> Self {
        *self.queue_mut(queue_type) = settings;
        self
    }

    /// Set the partition count of a queue type's default queue.
    pub fn with_partitions(mut self, queue_type: QueueType, partitions: u32) -> Self {
        self.queue_mut(queue_type).partitions = partitions;
        self
    }

    /// Set companion topic names.
    pub fn with_companion_topics(mut self, companion: CompanionTopics) -> Self {
        self.companion = companion;
        self
    }

    /// Set the notification topic base name.
    pub fn with_notifications_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.notifications_prefix = prefix.into();
        self
    }

    /// Default queue settings for a queue type.
    pub fn queue(&self, queue_type: QueueType) -> &QueueSettings {
        match queue_type {
            QueueType::Core => &self.core,
            QueueType::RuleEngine => &self.rule_engine,
            QueueType::VersionControl => &self.version_control,
            QueueType::EventQuery => &self.event_query,
            QueueType::TaskProcessor => &self.task_processor,
        }
    }

    fn queue_mut(&mut self, queue_type: QueueType) -> &mut QueueSettings {
        match queue_type {
            QueueType::Core => &mut self.core,
            QueueType::RuleEngine => &mut self.rule_engine,
            QueueType::VersionControl => &mut self.version_control,
            QueueType::EventQuery => &mut self.event_query,
            QueueType::TaskProcessor => &mut self.task_processor,
        }
    }

    /// Parse the configured hash function.
    pub fn hash_function(&self) -> Result<HashFunction> {
        HashFunction::from_str(&self.hash_function)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.hash_function()?;

        for queue_type in QueueType::ALL {
            let settings = self.queue(queue_type);
            if settings.partitions == 0 {
                return Err(Error::Config(format!(
                    "{} queue must have at least one partition",
                    queue_type
                )));
            }
            if settings.topic.is_empty() {
                return Err(Error::Config(format!("{} queue topic is empty", queue_type)));
            }
        }

        if self.companion.events_topic.is_empty() || self.companion.states_topic.is_empty() {
            return Err(Error::Config("companion topics must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Discovery adapter configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Delay before a peer leave triggers recomputation. Zero disables
    /// debouncing.
    pub recalculate_delay: Duration,

    /// Interval at which this node republishes its descriptor.
    pub republish_interval: Duration,

    /// Initial reconnect backoff.
    pub reconnect_backoff_min: Duration,

    /// Maximum reconnect backoff.
    pub reconnect_backoff_max: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            recalculate_delay: Duration::ZERO,
            republish_interval: Duration::from_secs(60),
            reconnect_backoff_min: Duration::from_millis(100),
            reconnect_backoff_max: Duration::from_secs(30),
        }
    }
}

impl DiscoveryConfig {
    /// Create a discovery configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the peer-leave debounce delay.
    pub fn with_recalculate_delay(mut self, delay: Duration) -> Self {
        self.recalculate_delay = delay;
        self
    }

    /// Set the republish interval.
    pub fn with_republish_interval(mut self, interval: Duration) -> Self {
        self.republish_interval = interval;
        self
    }

    /// Set reconnect backoff bounds.
    pub fn with_reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_backoff_min = min;
        self.reconnect_backoff_max = max;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.republish_interval.is_zero() {
            return Err(Error::Config("republish interval must be positive".to_string()));
        }
        if self.reconnect_backoff_min > self.reconnect_backoff_max {
            return Err(Error::Config(
                "reconnect backoff min exceeds max".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PartitionConfig::default();
        assert_eq!(config.hash_function, "murmur3_128");
        assert_eq!(config.rule_engine.partitions, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PartitionConfig::new()
            .with_hash_function("sha256")
            .with_partitions(QueueType::Core, 4)
            .with_queue(QueueType::TaskProcessor, QueueSettings::new("jobs", 3));

        assert_eq!(config.hash_function().unwrap(), HashFunction::Sha256);
        assert_eq!(config.queue(QueueType::Core).partitions, 4);
        assert_eq!(config.queue(QueueType::TaskProcessor).topic, "jobs");
    }

    #[test]
    fn test_unknown_hash_function_fails_validation() {
        let config = PartitionConfig::new().with_hash_function("crc32");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_partitions_fails_validation() {
        let config = PartitionConfig::new().with_partitions(QueueType::EventQuery, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discovery_config() {
        let config = DiscoveryConfig::new()
            .with_recalculate_delay(Duration::from_secs(5))
            .with_reconnect_backoff(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(config.recalculate_delay, Duration::from_secs(5));
        assert!(config.validate().is_err());
    }
}
