//! Bridge from async handlers to the synchronous core.
//!
//! Every `QuotationService` call opens a SQLite connection and may wait on the database lock,
//! so handlers run it on tokio's blocking pool instead of a runtime worker.

use quote_core::{QuoteError, QuoteResult};

/// Runs a core call on the blocking pool.
///
/// # Errors
///
/// Returns the call's own error, or `QuoteError::Internal` if the call panicked.
pub async fn run_blocking<T, F>(f: F) -> QuoteResult<T>
where
    F: FnOnce() -> QuoteResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!("blocking core call failed: {}", e);
        QuoteError::Internal("core call did not complete".into())
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_results_and_errors() {
        assert_eq!(run_blocking(|| Ok(7)).await.unwrap(), 7);
        let err = run_blocking::<(), _>(|| Err(QuoteError::NotFound("x".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let err = run_blocking::<(), _>(|| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, QuoteError::Internal(_)));
    }
}
