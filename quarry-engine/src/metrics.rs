//! Engine metrics
//!
//! Instrumentation for cache effectiveness and scheduler behavior. All
//! counters are relaxed atomics; a snapshot is a consistent-enough view
//! for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one engine instance.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Demands satisfied by a trusted cached result.
    pub hit_count: AtomicU64,

    /// Demands that required scheduling a computation.
    pub miss_count: AtomicU64,

    /// Rule bodies actually executed.
    pub execution_count: AtomicU64,

    /// Re-evaluations short-circuited because every consumed digest was
    /// unchanged (no body run).
    pub early_cutoff_count: AtomicU64,

    /// Results restored from the persisted cache instead of running the body.
    pub persisted_hit_count: AtomicU64,

    /// Nodes marked dirty by invalidation walks.
    pub invalidated_count: AtomicU64,

    /// Total time spent inside rule bodies (nanoseconds).
    pub total_compute_time_ns: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution(&self, duration: Duration) {
        self.execution_count.fetch_add(1, Ordering::Relaxed);
        self.total_compute_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_early_cutoff(&self) {
        self.early_cutoff_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persisted_hit(&self) {
        self.persisted_hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidated(&self, count: u64) {
        self.invalidated_count.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            executions: self.execution_count.load(Ordering::Relaxed),
            early_cutoffs: self.early_cutoff_count.load(Ordering::Relaxed),
            persisted_hits: self.persisted_hit_count.load(Ordering::Relaxed),
            invalidated: self.invalidated_count.load(Ordering::Relaxed),
            total_compute_time_ns: self.total_compute_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time view of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Demands satisfied by a trusted cached result.
    pub hits: u64,
    /// Demands that required scheduling a computation.
    pub misses: u64,
    /// Rule bodies actually executed.
    pub executions: u64,
    /// Re-evaluations short-circuited on unchanged digests.
    pub early_cutoffs: u64,
    /// Results restored from the persisted cache.
    pub persisted_hits: u64,
    /// Nodes marked dirty by invalidation walks.
    pub invalidated: u64,
    /// Total nanoseconds spent inside rule bodies.
    pub total_compute_time_ns: u64,
}

impl MetricsSnapshot {
    /// Cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Average time spent per executed rule body.
    pub fn avg_execution_time(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_compute_time_ns / self.executions)
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "Executions: {} | Early Cutoffs: {} | Persisted Hits: {}",
            self.executions, self.early_cutoffs, self.persisted_hits
        )?;
        writeln!(
            f,
            "Invalidated Nodes: {} | Avg Body Time: {:.2}ms",
            self.invalidated,
            self.avg_execution_time().as_secs_f64() * 1000.0
        )?;
        Ok(())
    }
}
