//! Metrics hooks for relationship operations.
//!
//! The core only depends on [`MetricsRecorder`]. [`Metrics`] keeps atomic
//! counters for tests and embedded use; an exporter (for instance the
//! Prometheus bridge in `bb-admin`) implements the trait over its own
//! registry.
//!
//! ## Usage
//!
//! ```ignore
//! use bb_relationship_sync::metrics::Metrics;
//!
//! let metrics = Arc::new(Metrics::new());
//! let service = RelationshipService::new(store, journal, config)
//!     .with_metrics(metrics.clone());
//! service.send_request(&alice, &bob).await?;
//! assert_eq!(metrics.snapshot().transitions_applied, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{RepairKind, TransitionKind};

/// Which write of a two-phase propagation a retry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WritePhase {
    Initiator,
    Counterpart,
    Repair,
    Sweep,
}

impl WritePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Counterpart => "counterpart",
            Self::Repair => "repair",
            Self::Sweep => "sweep",
        }
    }
}

/// Trait for custom metrics recording implementations.
pub trait MetricsRecorder: Send + Sync {
    /// `outcome` is `applied`, `rejected`, `partially_applied` or `error`.
    fn record_transition(&self, kind: TransitionKind, outcome: &'static str);

    fn record_retry(&self, phase: WritePhase);

    /// A counterpart write was handed to the intent journal.
    fn record_deferred(&self);

    fn record_repair(&self, kind: RepairKind);

    /// Records touched by one account sweep.
    fn record_sweep(&self, updated: usize);
}

/// Atomic counters behind [`MetricsRecorder`].
#[derive(Debug, Default)]
pub struct Metrics {
    pub transitions_applied: AtomicU64,
    pub transitions_rejected: AtomicU64,
    pub transitions_partial: AtomicU64,
    pub transitions_failed: AtomicU64,
    pub write_retries: AtomicU64,
    pub deferred_writes: AtomicU64,
    pub repairs: AtomicU64,
    pub swept_records: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            transitions_partial: self.transitions_partial.load(Ordering::Relaxed),
            transitions_failed: self.transitions_failed.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            deferred_writes: self.deferred_writes.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            swept_records: self.swept_records.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transitions_applied: u64,
    pub transitions_rejected: u64,
    pub transitions_partial: u64,
    pub transitions_failed: u64,
    pub write_retries: u64,
    pub deferred_writes: u64,
    pub repairs: u64,
    pub swept_records: u64,
}

impl MetricsRecorder for Metrics {
    fn record_transition(&self, _kind: TransitionKind, outcome: &'static str) {
        let counter = match outcome {
            "applied" => &self.transitions_applied,
            "rejected" => &self.transitions_rejected,
            "partially_applied" => &self.transitions_partial,
            _ => &self.transitions_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self, _phase: WritePhase) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_deferred(&self) {
        self.deferred_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_repair(&self, _kind: RepairKind) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sweep(&self, updated: usize) {
        self.swept_records
            .fetch_add(updated as u64, Ordering::Relaxed);
    }
}

/// No-op metrics recorder for when metrics are disabled
#[derive(Debug, Default)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_transition(&self, _: TransitionKind, _: &'static str) {}
    fn record_retry(&self, _: WritePhase) {}
    fn record_deferred(&self) {}
    fn record_repair(&self, _: RepairKind) {}
    fn record_sweep(&self, _: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        assert_eq!(Metrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_transition_outcomes_counted_separately() {
        let metrics = Metrics::new();
        metrics.record_transition(TransitionKind::SendRequest, "applied");
        metrics.record_transition(TransitionKind::Accept, "applied");
        metrics.record_transition(TransitionKind::Cancel, "rejected");
        metrics.record_transition(TransitionKind::Unfriend, "partially_applied");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transitions_applied, 2);
        assert_eq!(snapshot.transitions_rejected, 1);
        assert_eq!(snapshot.transitions_partial, 1);
        assert_eq!(snapshot.transitions_failed, 0);
    }

    #[test]
    fn test_sweep_accumulates() {
        let metrics = Metrics::new();
        metrics.record_sweep(3);
        metrics.record_sweep(2);
        assert_eq!(metrics.snapshot().swept_records, 5);
    }
}
