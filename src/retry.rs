//! Shared retry policy for upstream calls.
//!
//! Every content-source and embedding request funnels through [`retry`].
//! Errors that report themselves [`Retryable`] are retried with exponential
//! backoff plus random jitter; anything else is returned immediately. Once
//! `max_attempts` is reached the last error is returned to the caller, which
//! decides whether that means "no content" or a failed unit.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Classifies an error as worth retrying.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^attempt`,
    /// capped at `max_delay`, plus up to the same amount again in jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX);
        let base = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if base.is_zero() {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is spent.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed ({}), retrying in {:.2}s (attempt {}/{})",
                    what,
                    err,
                    delay.as_secs_f64(),
                    attempt + 1,
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(bool);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, TestError> =
            retry(&RetryPolicy::immediate(5), "op", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TestError(true))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> =
            retry(&RetryPolicy::immediate(4), "op", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> =
            retry(&RetryPolicy::immediate(10), "op", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(400));
        let late = policy.delay_for(9);
        assert!(late >= Duration::from_millis(1000) && late <= Duration::from_millis(2000));
        assert_eq!(RetryPolicy::immediate(3).delay_for(5), Duration::ZERO);
    }
}
