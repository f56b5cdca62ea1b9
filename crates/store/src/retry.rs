//! Deadline and bounded-retry wrapper for store operations.

use std::{future::Future, time::Duration};

use tracing::warn;

use veil_config::RetryPolicy;

use crate::error::{Result, StoreError};

/// Run `op` under a per-attempt deadline, retrying transient failures with
/// exponential backoff and jitter. Definitive failures and exhausted retries
/// surface to the caller; the repository then rolls back any cache mutation
/// and the handler reports an error frame.
pub async fn with_retry<T, F, Fut>(
    name: &str,
    timeout_ms: u64,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Duration::from_millis(timeout_ms);
    let mut attempt: u32 = 0;

    loop {
        let result = match tokio::time::timeout(deadline, op()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let backoff = policy.base_backoff_ms.saturating_mul(1u64 << attempt.min(16));
                let jitter = rand::random_range(0..=backoff / 2 + 1);
                warn!(
                    op = name,
                    attempt,
                    backoff_ms = backoff + jitter,
                    error = %err,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry("test", 1000, policy(), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn definitive_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = with_retry("test", 1000, policy(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Corrupt("bad row".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let result: Result<()> = with_retry("test", 1000, policy(), || async {
            Err(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let result: Result<()> = with_retry(
            "test",
            10,
            RetryPolicy {
                max_retries: 0,
                base_backoff_ms: 1,
            },
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }
}
