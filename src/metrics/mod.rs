//! Metrics for partition routing.
//!
//! Lock-free counters and gauges grouped in [`RoutingMetrics`]. A plain
//! [`MetricsSnapshot`] can be taken at any time for export.
//!
//! # Example
//!
//! ```rust
//! use partition_router::metrics::RoutingMetrics;
//!
//! let metrics = RoutingMetrics::new();
//! metrics.recalculations.inc();
//! metrics.record_fallback("tb-rule-engine");
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.recalculations, 1);
//! assert_eq!(snapshot.queue_fallbacks, 1);
//! ```

mod counters;
mod gauges;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;

/// Metrics of a partition service and its discovery adapter.
#[derive(Debug)]
pub struct RoutingMetrics {
    /// Completed ownership recomputations.
    pub recalculations: Counter,
    /// Partitions skipped because owner resolution failed.
    pub partition_failures: Counter,
    /// Resolutions that hit an unknown tenant.
    pub tenant_not_found: Counter,
    /// Successful reconnects to the coordination backend.
    pub reconnects: Counter,
    /// Peer leaves absorbed by the debounce window.
    pub debounced_leaves: Counter,
    /// Registry fallbacks by queue type.
    pub queue_fallbacks: LabeledCounter<1>,
    /// Partitions currently owned by this node.
    pub owned_partitions: Gauge,
}

impl RoutingMetrics {
    /// Create a new metrics set.
    pub fn new() -> Self {
        Self {
            recalculations: Counter::new(),
            partition_failures: Counter::new(),
            tenant_not_found: Counter::new(),
            reconnects: Counter::new(),
            debounced_leaves: Counter::new(),
            queue_fallbacks: LabeledCounter::new(),
            owned_partitions: Gauge::new(),
        }
    }

    /// Record a registry fallback.
    pub fn record_fallback(&self, queue_type: &str) {
        self.queue_fallbacks.inc([queue_type]);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            recalculations: self.recalculations.get(),
            partition_failures: self.partition_failures.get(),
            tenant_not_found: self.tenant_not_found.get(),
            reconnects: self.reconnects.get(),
            debounced_leaves: self.debounced_leaves.get(),
            queue_fallbacks: self.queue_fallbacks.total(),
            owned_partitions: self.owned_partitions.get(),
        }
    }
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RoutingMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub recalculations: u64,
    pub partition_failures: u64,
    pub tenant_not_found: u64,
    pub reconnects: u64,
    pub debounced_leaves: u64,
    /// Sum over all queue types.
    pub queue_fallbacks: u64,
    pub owned_partitions: i64,
}
