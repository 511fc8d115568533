//! Bulk provider seam.

use futures::future::BoxFuture;
use std::future::Future;

use super::error::BulkError;

/// Downstream bulk call: takes the batch's contexts in arrival order
/// and produces the corresponding values.
///
/// The provider must tolerate overlapping invocations up to the
/// collapser's `batch_max_concurrency`. The returned values need not
/// be in context order, nor complete; the collapser matches them back
/// to waiters with the configured context/value matcher.
///
/// Any `Fn(Vec<C>) -> Future` closure with the right signature
/// implements this trait.
pub trait BulkProvider<C, V>: Send + Sync {
    /// Loads values for a batch of contexts.
    fn load(&self, contexts: Vec<C>) -> BoxFuture<'static, Result<Vec<V>, BulkError>>;
}

impl<C, V, F, Fut> BulkProvider<C, V> for F
where
    F: Fn(Vec<C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<V>, BulkError>> + Send + 'static,
{
    fn load(&self, contexts: Vec<C>) -> BoxFuture<'static, Result<Vec<V>, BulkError>> {
        Box::pin(self(contexts))
    }
}
