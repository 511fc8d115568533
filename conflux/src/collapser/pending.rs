//! Pending items and their completion sinks.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::context::ContextSnapshot;

use super::error::CollapseError;

/// Terminal signal delivered to one waiter.
#[derive(Debug)]
pub(crate) enum Outcome<V> {
    /// A bulk value matched this waiter's context.
    Value(V),
    /// No value matched; the request completes empty.
    Empty,
    /// The batch failed.
    Error(CollapseError),
}

/// What travels back through a completion sink: the terminal outcome
/// plus the diagnostic snapshot captured at subscription, reinstated
/// on the caller side before the outcome is surfaced.
#[derive(Debug)]
pub(crate) struct Emission<V> {
    pub(crate) outcome: Outcome<V>,
    pub(crate) snapshot: ContextSnapshot,
}

/// One awaiting caller.
///
/// Created when a collapsed request is first polled; consumed exactly
/// once, either by fulfillment or by parking on cancellation. The
/// oneshot sink makes double fulfillment unrepresentable.
#[derive(Debug)]
pub(crate) struct PendingItem<C, V> {
    pub(crate) context: C,
    pub(crate) sink: oneshot::Sender<Emission<V>>,
    pub(crate) submitted_at: Instant,
    pub(crate) snapshot: ContextSnapshot,
}

impl<C, V> PendingItem<C, V> {
    /// Fulfills the waiter. Returns false if the waiter already went
    /// away; an ignored completion, not an error.
    pub(crate) fn complete(self, outcome: Outcome<V>) -> bool {
        let snapshot = self.snapshot;
        self.sink.send(Emission { outcome, snapshot }).is_ok()
    }
}

/// Sinks kept alive but never fulfilled after `cancel()`.
///
/// Waiters behind these sinks observe no signal while the collapser
/// lives; dropping the collapser drops the sinks and resolves any
/// remaining waiters to [`CollapseError::Cancelled`].
#[derive(Debug)]
pub(crate) struct ParkedSinks<C, V> {
    inner: Arc<Mutex<Vec<PendingItem<C, V>>>>,
}

impl<C, V> Clone for ParkedSinks<C, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, V> ParkedSinks<C, V> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn park(&self, item: PendingItem<C, V>) {
        self.inner.lock().unwrap().push(item);
    }

    pub(crate) fn park_all(&self, items: impl IntoIterator<Item = PendingItem<C, V>>) {
        self.inner.lock().unwrap().extend(items);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
