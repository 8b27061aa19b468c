use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

/// Retry budget for one logical backend call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single attempt; exceeding it counts as `LlmError::Timeout`.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), doubling each time and capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Final error of a retried call plus how many retries were spent on it.
#[derive(Debug)]
pub struct RetryExhausted {
    pub error: LlmError,
    pub retries: u32,
}

impl std::fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} retries)", self.error, self.retries)
    }
}

impl std::error::Error for RetryExhausted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Run `f` under `policy`: each attempt is bounded by `call_timeout`, retryable
/// errors are retried with exponential backoff, others are returned at once.
///
/// # Errors
///
/// Returns [`RetryExhausted`] carrying the last error once the budget is spent
/// or a non-retryable error occurs.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut f: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut retries = 0u32;
    loop {
        let outcome = match tokio::time::timeout(policy.call_timeout, f()).await {
            Ok(res) => res,
            Err(_) => Err(LlmError::Timeout {
                timeout_ms: u64::try_from(policy.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && retries < policy.max_retries => {
                let delay = policy.backoff(retries);
                retries += 1;
                tracing::warn!(
                    call = label,
                    %error,
                    retry = retries,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "backend call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(RetryExhausted { error, retries }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn call_with_retry_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = call_with_retry(&fast_policy(2), "test", || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LlmError::RateLimited)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn call_with_retry_gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let err = call_with_retry::<(), _, _>(&fast_policy(2), "test", || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::MalformedResponse("garbage".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err.error, LlmError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn call_with_retry_does_not_retry_invalid_input() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let err = call_with_retry::<(), _, _>(&fast_policy(3), "test", || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::InvalidInput("bad".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn call_with_retry_times_out_hanging_call() {
        let err = call_with_retry::<(), _, _>(&fast_policy(1), "test", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err.error, LlmError::Timeout { timeout_ms: 50 }));
        assert_eq!(err.retries, 1);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn backoff_never_exceeds_cap(attempt in 0u32..200) {
            let policy = RetryPolicy::default();
            let delay = policy.backoff(attempt);
            prop_assert!(delay <= policy.max_backoff);
            prop_assert!(delay >= policy.base_backoff.min(policy.max_backoff));
        }
    }
}
