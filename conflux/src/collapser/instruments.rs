//! Meter bundle for a collapser instance.

use std::time::Duration;

use crate::metrics::{DistributionSummary, MetricId, MetricsRegistry, Timer};

/// The four collapser meters, resolved once at build time.
///
/// Without a metrics binding every recording is a no-op, so the hot
/// path carries no registry lookups either way.
#[derive(Debug, Default)]
pub(crate) struct CollapserInstruments {
    pending: Option<DistributionSummary>,
    batch_size: Option<DistributionSummary>,
    item_delay: Option<Timer>,
    item_completion: Option<Timer>,
}

impl CollapserInstruments {
    /// No-op instruments for collapsers built without metrics.
    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn new(registry: &MetricsRegistry, id: &MetricId) -> Self {
        Self {
            pending: Some(registry.qualified_summary(id, "item.pending", "pending")),
            batch_size: Some(registry.qualified_summary(id, "batch.size", "batch_size")),
            item_delay: Some(registry.qualified_timer(id, "item.delay", "item_delay")),
            item_completion: Some(registry.qualified_timer(id, "item.completion", "item_completion")),
        }
    }

    /// Records the open-batch occupancy: once per arrival (count after
    /// insertion) and once when a batch closes (remaining count).
    pub(crate) fn record_pending(&self, pending: usize) {
        if let Some(summary) = &self.pending {
            summary.record(pending as f64);
        }
    }

    /// Records the size of a batch at dispatch.
    pub(crate) fn record_batch_size(&self, size: usize) {
        if let Some(summary) = &self.batch_size {
            summary.record(size as f64);
        }
    }

    /// Records one item's wait from submission to bulk-call start.
    pub(crate) fn record_delay(&self, elapsed: Duration) {
        if let Some(timer) = &self.item_delay {
            timer.record(elapsed);
        }
    }

    /// Records one item's total time from submission to emission.
    pub(crate) fn record_completion(&self, elapsed: Duration) {
        if let Some(timer) = &self.item_completion {
            timer.record(elapsed);
        }
    }
}
