//! View Metrics
//!
//! Every view counts what happens on its read path, in its single-flight
//! generation and in the sweeper. Counters are relaxed atomics so recording
//! never contends with the hot path.
//!
//! # Why BTreeMap over HashMap?
//!
//! Metrics are reported as a `BTreeMap` so that keys always come out in the
//! same order. That keeps test assertions, logs and exported snapshots stable
//! across runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by one view.
#[derive(Debug, Default)]
pub struct ViewMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    generation_failures: AtomicU64,
    waits: AtomicU64,
    evictions: AtomicU64,
    refreshes: AtomicU64,
}

impl ViewMetrics {
    /// A read served from the backing map (including stale values served
    /// while an eager refresh runs).
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A read that had to go through generation.
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A generator invocation by a producer.
    pub(crate) fn record_generation(&self, succeeded: bool) {
        self.generations.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.generation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A caller that joined someone else's generation.
    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    /// An entry removed by the sweeper.
    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// A background refresh that was submitted.
    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads served from the backing map.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Reads that went through generation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Generator invocations.
    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    /// Generator invocations that failed.
    pub fn generation_failures(&self) -> u64 {
        self.generation_failures.load(Ordering::Relaxed)
    }

    /// Callers that waited on another caller's generation.
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Entries removed by the sweeper.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Background refreshes submitted.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Fraction of reads served without generation, or 0.0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let requests = hits + self.misses();
        if requests > 0 {
            hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a map for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("evictions".to_string(), self.evictions() as f64);
        metrics.insert("generation_failures".to_string(), self.generation_failures() as f64);
        metrics.insert("generations".to_string(), self.generations() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("hits".to_string(), self.hits() as f64);
        metrics.insert("misses".to_string(), self.misses() as f64);
        metrics.insert("refreshes".to_string(), self.refreshes() as f64);
        metrics.insert("requests".to_string(), (self.hits() + self.misses()) as f64);
        metrics.insert("waits".to_string(), self.waits() as f64);
        metrics
    }
}

/// Uniform metrics reporting for cache views.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name of the value kind the view stores (e.g. `"Int"`, `"Object"`).
    fn view_kind(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ViewMetrics::default();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_generation(true);
        metrics.record_generation(false);
        metrics.record_wait();
        metrics.record_eviction();
        metrics.record_refresh();

        assert_eq!(metrics.hits(), 3);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.generations(), 2);
        assert_eq!(metrics.generation_failures(), 1);
        assert_eq!(metrics.waits(), 1);
        assert_eq!(metrics.evictions(), 1);
        assert_eq!(metrics.refreshes(), 1);
        assert!((metrics.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_btreemap_is_ordered() {
        let metrics = ViewMetrics::default();
        metrics.record_miss();
        let map = metrics.to_btreemap();

        let keys: Vec<_> = map.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(map.get("requests"), Some(&1.0));
        assert_eq!(map.get("hit_rate"), Some(&0.0));
    }
}
