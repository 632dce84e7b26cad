//! Rate-limit retry with exponential backoff.
//!
//! Backend and oracle calls that are refused for rate limiting are slept on
//! and retried rather than failed. Every other error passes through at once.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bounded sleep-and-retry policy for rate-limited calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Errors that can report a rate-limit refusal.
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;
}

/// Run `op`, retrying only while it fails with a rate-limit error.
pub async fn retry_on_rate_limit<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RateLimited + std::fmt::Display,
{
    let mut retries = 0;
    loop {
        match op().await {
            Err(e) if e.is_rate_limited() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    error = %e,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Limited,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RateLimited for TestError {
        fn is_rate_limited(&self) -> bool {
            matches!(self, TestError::Limited)
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_base_ms, 2_000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let result = retry_on_rate_limit(&policy, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::Limited)
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 10,
        };
        let result: Result<(), _> = retry_on_rate_limit(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Limited)
        })
        .await;
        assert!(matches!(result, Err(TestError::Limited)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let result: Result<(), _> = retry_on_rate_limit(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Fatal)
        })
        .await;
        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
