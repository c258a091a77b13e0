//! Monotonic counters.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters keyed by `N` label values, e.g. `[queue_type]`.
#[derive(Debug, Default)]
pub struct LabeledCounter<const N: usize> {
    values: DashMap<[String; N], u64>,
}

impl<const N: usize> LabeledCounter<N> {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
        }
    }

    pub fn inc(&self, labels: [&str; N]) {
        *self.values.entry(labels.map(str::to_string)).or_insert(0) += 1;
    }

    /// Value for a label set, zero if never incremented.
    pub fn get(&self, labels: [&str; N]) -> u64 {
        self.values
            .get(&labels.map(str::to_string))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Sum over every label set.
    pub fn total(&self) -> u64 {
        self.values.iter().map(|entry| *entry.value()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_labeled_counter() {
        let counter = LabeledCounter::<1>::new();
        counter.inc(["tb-core"]);
        counter.inc(["tb-core"]);
        counter.inc(["edqs"]);
        assert_eq!(counter.get(["tb-core"]), 2);
        assert_eq!(counter.get(["tasks"]), 0);
        assert_eq!(counter.total(), 3);
    }
}
