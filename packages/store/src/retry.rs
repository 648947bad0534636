//! Bounded exponential backoff for object-storage calls.
//!
//! Only errors flagged transient by [`StoreError::is_transient`] are
//! retried. Permission and not-found failures surface on the first
//! attempt.

use std::future::Future;

use price_pipeline_config::RetryConfig;

use crate::StoreError;

/// Runs `op` until it succeeds, fails permanently, or
/// [`RetryConfig::max_attempts`] is exhausted.
///
/// The `op` closure is called on each attempt to build a fresh request
/// future.
///
/// # Errors
///
/// Returns the last [`StoreError`] once retries are exhausted, or the
/// first non-transient error.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "  {what}: attempt {attempt}/{max_attempts} failed, retrying in {delay:.1?}: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::StoreOp;

    fn failure(transient: bool) -> StoreError {
        StoreError::Request {
            op: StoreOp::Get,
            bucket: "b".to_string(),
            key: "k".to_string(),
            transient,
            source: "boom".into(),
        }
    }

    const FAST: RetryConfig = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 0,
    };

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&FAST, "get", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(failure(true))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&FAST, "get", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(failure(true))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&FAST, "get", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(failure(false))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
