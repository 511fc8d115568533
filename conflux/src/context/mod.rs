//! Diagnostic-context store and propagation.
//!
//! A diagnostic context is a caller-scoped key/value map used for log
//! correlation. The map is thread-local by contract; anything that
//! crosses an executor boundary must carry an explicit
//! [`ContextSnapshot`] and reinstate it on the other side.
//!
//! # Propagation model
//!
//! ```text
//! caller thread                 worker thread
//! ─────────────                 ─────────────
//! put("req", "42")
//! snapshot ──────┐
//!                │  travels with the work item
//!                └────────────► install ─► run ─► restore
//! ```
//!
//! Two pieces cooperate:
//!
//! - [`ContextSnapshot`] captures the map at a propagation point and
//!   can be reinstated anywhere, either scoped ([`install`]) or by
//!   replacing the current map ([`make_current`]).
//! - [`propagate`] wraps a future so the snapshot taken at the call
//!   site is installed around every poll and the previous map is
//!   restored afterwards.
//!
//! The collapser captures a snapshot when a request subscribes and
//! reinstates it when the corresponding value is emitted, so callers
//! observe the map that was active at subscription no matter which
//! worker produced the value.
//!
//! [`install`]: ContextSnapshot::install
//! [`make_current`]: ContextSnapshot::make_current

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;

thread_local! {
    static ACTIVE: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

/// The thread-local diagnostic map.
///
/// All accessors operate on the map of the calling thread.
#[derive(Debug)]
pub struct DiagnosticContext;

impl DiagnosticContext {
    /// Associates `value` with `key` on the current thread.
    pub fn put(key: impl Into<String>, value: impl Into<String>) {
        ACTIVE.with(|map| {
            map.borrow_mut().insert(key.into(), value.into());
        });
    }

    /// Returns the value for `key`, if present.
    pub fn get(key: &str) -> Option<String> {
        ACTIVE.with(|map| map.borrow().get(key).cloned())
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(key: &str) -> Option<String> {
        ACTIVE.with(|map| map.borrow_mut().remove(key))
    }

    /// Clears the current thread's map.
    pub fn clear() {
        ACTIVE.with(|map| map.borrow_mut().clear());
    }

    /// Captures the current map as a snapshot.
    pub fn snapshot() -> ContextSnapshot {
        ContextSnapshot::capture()
    }
}

/// Immutable copy of a diagnostic map, cheap to clone and send.
#[derive(Clone, Debug, Default)]
pub struct ContextSnapshot {
    values: Arc<HashMap<String, String>>,
}

impl ContextSnapshot {
    /// Captures the map active on the current thread.
    pub fn capture() -> Self {
        let values = ACTIVE.with(|map| map.borrow().clone());
        Self {
            values: Arc::new(values),
        }
    }

    /// Returns the snapshot value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns true if the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces the current thread's map with this snapshot.
    ///
    /// Used at emission points: the caller-side continuation must see
    /// the map that was active at subscription.
    pub fn make_current(&self) {
        ACTIVE.with(|map| {
            *map.borrow_mut() = (*self.values).clone();
        });
    }

    /// Installs this snapshot, returning a guard that restores the
    /// previous map when dropped.
    pub fn install(&self) -> InstalledContext {
        let previous = ACTIVE.with(|map| {
            std::mem::replace(&mut *map.borrow_mut(), (*self.values).clone())
        });
        InstalledContext {
            previous: Some(previous),
        }
    }
}

/// Guard for a scoped snapshot installation.
///
/// Restores the map that was active before [`ContextSnapshot::install`].
#[derive(Debug)]
pub struct InstalledContext {
    previous: Option<HashMap<String, String>>,
}

impl Drop for InstalledContext {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            ACTIVE.with(|map| {
                *map.borrow_mut() = previous;
            });
        }
    }
}

/// Wraps `future` so the diagnostic map active at the call site is
/// installed around every poll.
///
/// This is the explicit counterpart of a scheduler-submission hook:
/// apply it where work is handed to another executor and the work
/// should run under the submitter's context.
pub fn propagate<F>(future: F) -> Propagated<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    Propagated::with_snapshot(ContextSnapshot::capture(), future)
}

/// Future that runs its inner future under a fixed context snapshot.
///
/// The previous map is restored after each poll, so unrelated work
/// interleaved on the same worker thread is unaffected.
pub struct Propagated<T> {
    snapshot: ContextSnapshot,
    inner: BoxFuture<'static, T>,
}

impl<T> Propagated<T> {
    /// Binds `future` to an explicit snapshot instead of capturing one.
    pub fn with_snapshot<F>(snapshot: ContextSnapshot, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send,
    {
        Self {
            snapshot,
            inner: Box::pin(future),
        }
    }
}

impl<T> Future for Propagated<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let _installed = this.snapshot.install();
        this.inner.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for Propagated<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagated")
            .field("snapshot", &self.snapshot)
            .finish()
    }
}
