//! Closed batches handed from the aggregator to the dispatcher.

use std::time::Instant;

use super::pending::PendingItem;

/// Why a batch was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchCloseReason {
    /// The batch reached the configured size.
    SizeReached,
    /// The max-wait timer fired.
    TimeExpired,
    /// The collapser was cancelled.
    Cancelled,
}

/// An ordered group of pending items dispatched together.
///
/// Closed batches are immutable: the aggregator hands them off whole
/// and never touches them again. A closed batch is never empty.
#[derive(Debug)]
pub(crate) struct Batch<C, V> {
    pub(crate) items: Vec<PendingItem<C, V>>,
    pub(crate) opened_at: Instant,
    pub(crate) reason: BatchCloseReason,
}

impl<C, V> Batch<C, V> {
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
