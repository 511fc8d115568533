//! Collapser error taxonomy.

use std::sync::Arc;

use thiserror::Error;

/// Error type the bulk provider may fail with.
pub type BulkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared handle to a provider error.
///
/// One bulk failure fans out to every waiter of the batch; each waiter
/// receives a clone of the same underlying error instance.
pub type SharedBulkError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported to a collapsed request.
#[derive(Clone, Debug, Error)]
pub enum CollapseError {
    /// The bulk provider failed; the batch's error, shared by all of
    /// its waiters.
    #[error("bulk provider failed: {0}")]
    Provider(#[source] SharedBulkError),

    /// The collapser was cancelled and has since been dropped.
    #[error("request collapser is cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_cause() {
        let cause: BulkError = "downstream exploded".into();
        let error = CollapseError::Provider(Arc::from(cause));
        assert_eq!(
            error.to_string(),
            "bulk provider failed: downstream exploded"
        );
    }

    #[test]
    fn provider_error_clones_share_the_cause() {
        let cause: BulkError = "boom".into();
        let shared: SharedBulkError = Arc::from(cause);
        let first = CollapseError::Provider(Arc::clone(&shared));
        let second = first.clone();
        match (first, second) {
            (CollapseError::Provider(a), CollapseError::Provider(b)) => {
                assert!(Arc::ptr_eq(&a, &b));
            }
            _ => unreachable!(),
        }
    }
}
