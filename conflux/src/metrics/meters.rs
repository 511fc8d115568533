//! Meter primitives.
//!
//! Meters are cheap cloneable handles over shared atomic cells, so a
//! component can hold its meters directly while the registry retains
//! the same cells for queries. All updates are lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Atomic f64 cell built on `AtomicU64` bit transmutation.
#[derive(Debug, Default)]
struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Monotonically increasing floating-point counter.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    cell: Arc<AtomicF64>,
}

impl Counter {
    /// Adds one to the counter.
    pub fn increment(&self) {
        self.add(1.0);
    }

    /// Adds `amount` to the counter.
    pub fn add(&self, amount: f64) {
        self.cell.add(amount);
    }

    /// Returns the accumulated value.
    pub fn value(&self) -> f64 {
        self.cell.get()
    }
}

/// Distribution of recorded amounts (count and running total).
#[derive(Clone, Debug, Default)]
pub struct DistributionSummary {
    count: Arc<AtomicU64>,
    total: Arc<AtomicF64>,
}

impl DistributionSummary {
    /// Records one sample.
    pub fn record(&self, amount: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.add(amount);
    }

    /// Number of recorded samples.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of recorded samples.
    pub fn total_amount(&self) -> f64 {
        self.total.get()
    }
}

/// Distribution of recorded durations.
#[derive(Clone, Debug, Default)]
pub struct Timer {
    count: Arc<AtomicU64>,
    total_nanos: Arc<AtomicU64>,
}

impl Timer {
    /// Records one elapsed duration.
    pub fn record(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Number of recorded durations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of recorded durations.
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }
}
