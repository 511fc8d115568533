//! Operational statistics for a collapser instance.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Atomic counters updated across the collapser pipeline.
#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    pub(crate) arrivals: AtomicU64,
    pub(crate) batches_dispatched: AtomicU64,
    pub(crate) values_matched: AtomicU64,
    pub(crate) values_unmatched: AtomicU64,
    pub(crate) completed_empty: AtomicU64,
    pub(crate) provider_errors: AtomicU64,
}

impl StatsCell {
    pub(crate) fn snapshot(&self) -> CollapserStats {
        CollapserStats {
            arrivals: self.arrivals.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            values_matched: self.values_matched.load(Ordering::Relaxed),
            values_unmatched: self.values_unmatched.load(Ordering::Relaxed),
            completed_empty: self.completed_empty.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of collapsing effectiveness.
#[derive(Clone, Debug, Default)]
pub struct CollapserStats {
    /// Requests received.
    pub arrivals: u64,
    /// Batches handed to the bulk provider.
    pub batches_dispatched: u64,
    /// Bulk values matched back to a waiter.
    pub values_matched: u64,
    /// Bulk values no pending context matched (discarded).
    pub values_unmatched: u64,
    /// Waiters completed without a value.
    pub completed_empty: u64,
    /// Bulk calls that failed.
    pub provider_errors: u64,
}

impl CollapserStats {
    /// Mean batch size observed so far.
    pub fn mean_batch_size(&self) -> f64 {
        if self.batches_dispatched == 0 {
            0.0
        } else {
            self.arrivals as f64 / self.batches_dispatched as f64
        }
    }

    /// Logs the snapshot.
    pub fn log(&self) {
        info!(
            arrivals = self.arrivals,
            batches = self.batches_dispatched,
            matched = self.values_matched,
            unmatched = self.values_unmatched,
            empty = self.completed_empty,
            provider_errors = self.provider_errors,
            mean_batch_size = format!("{:.1}", self.mean_batch_size()),
            "collapser statistics"
        );
    }
}
