//! Metrics primitives and registry.
//!
//! Provides lightweight metric types (counter, gauge) and a registry to
//! create and retrieve them. Values live in memory as atomics; there is no
//! exporter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

/// Metric names recorded by the engine.
pub mod names {
    /// Plan executions started.
    pub const PLAN_EXECUTIONS_STARTED: &str = "plan_executions_started_total";
    /// Plan executions that reached a terminal status.
    pub const PLAN_EXECUTIONS_ENDED: &str = "plan_executions_ended_total";
    /// Node executions started.
    pub const NODE_EXECUTIONS_STARTED: &str = "node_executions_started_total";
    /// Node executions concluded.
    pub const NODE_EXECUTIONS_CONCLUDED: &str = "node_executions_concluded_total";
    /// Node executions started but not yet concluded.
    pub const NODE_EXECUTIONS_ACTIVE: &str = "node_executions_active";
    /// Nodes failed by an engine fault.
    pub const ENGINE_FAULTS: &str = "engine_faults_total";
    /// Interrupts processed successfully.
    pub const INTERRUPTS_PROCESSED: &str = "interrupts_processed_total";
    /// Interrupts processed unsuccessfully.
    pub const INTERRUPTS_FAILED: &str = "interrupts_failed_total";
}

/// An incrementing counter.
#[derive(Debug, Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Create a new counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by a given amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// A gauge that can go up and down.
#[derive(Debug, Clone)]
pub struct Gauge {
    value: Arc<AtomicI64>,
}

impl Gauge {
    /// Create a new gauge starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by one.
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Set to a specific value.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry for creating and retrieving named metrics.
///
/// # Examples
///
/// ```
/// use stratus_telemetry::metrics::MetricsRegistry;
///
/// let registry = MetricsRegistry::new();
/// let counter = registry.counter("plan_executions_started_total");
/// counter.inc();
/// assert_eq!(counter.get(), 1);
///
/// // Retrieving the same name returns the same metric.
/// let same = registry.counter("plan_executions_started_total");
/// assert_eq!(same.get(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<HashMap<String, Counter>>>,
    gauges: Arc<RwLock<HashMap<String, Gauge>>>,
}

impl MetricsRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            gauges: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or create a counter by name.
    pub fn counter(&self, name: &str) -> Counter {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    /// Get or create a gauge by name.
    pub fn gauge(&self, name: &str) -> Gauge {
        if let Some(gauge) = self.gauges.read().get(name) {
            return gauge.clone();
        }
        self.gauges
            .write()
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    /// Current value of every counter and gauge, keyed by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        let mut values: BTreeMap<String, i64> = self
            .counters
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), i64::try_from(c.get()).unwrap_or(i64::MAX)))
            .collect();
        values.extend(
            self.gauges
                .read()
                .iter()
                .map(|(name, g)| (name.clone(), g.get())),
        );
        values
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn counter_increments() {
        let c = Counter::new();
        c.inc();
        c.inc_by(5);
        assert_eq!(c.get(), 6);
    }

    #[test]
    fn gauge_up_and_down() {
        let g = Gauge::new();
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.get(), 1);
        g.set(42);
        assert_eq!(g.get(), 42);
    }

    #[test]
    fn registry_returns_same_metric_for_same_name() {
        let reg = MetricsRegistry::new();
        let c1 = reg.counter("requests");
        c1.inc();
        let c2 = reg.counter("requests");
        assert_eq!(c2.get(), 1);
    }

    #[test]
    fn registry_different_names_are_independent() {
        let reg = MetricsRegistry::new();
        let c1 = reg.counter("a");
        let c2 = reg.counter("b");
        c1.inc();
        assert_eq!(c1.get(), 1);
        assert_eq!(c2.get(), 0);
    }

    #[test]
    fn snapshot_lists_counters_and_gauges() {
        let reg = MetricsRegistry::new();
        reg.counter(names::ENGINE_FAULTS).inc_by(2);
        reg.gauge(names::NODE_EXECUTIONS_ACTIVE).set(-1);

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.get(names::ENGINE_FAULTS), Some(&2));
        assert_eq!(snapshot.get(names::NODE_EXECUTIONS_ACTIVE), Some(&-1));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn clones_share_metrics() {
        let reg = MetricsRegistry::new();
        let other = reg.clone();
        other.counter(names::INTERRUPTS_PROCESSED).inc();
        assert_eq!(reg.counter(names::INTERRUPTS_PROCESSED).get(), 1);
    }
}
