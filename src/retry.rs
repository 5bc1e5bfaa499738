//! C5 — Retry Executor: bounded exponential backoff with jitter, aborting
//! immediately on a non-retriable failure or on cancellation/deadline.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay between attempt `i` (1-indexed) and `i+1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt as i32 - 1);
        let raw = self.base_delay.mul_f64(exp).min(self.max_delay);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            raw.mul_f64(factor)
        } else {
            raw
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("deadline exceeded")]
    Timeout,
    #[error("canceled")]
    Canceled,
    #[error(transparent)]
    Exhausted(E),
}

/// Runs `operation` under `policy`, retrying on errors for which
/// `is_retryable` returns true, honoring both `deadline` and `cancellation`.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    deadline: tokio::time::Instant,
    cancellation: &CancellationToken,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        if cancellation.is_cancelled() {
            return Err(RetryError::Canceled);
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(RetryError::Timeout);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(RetryError::Canceled),
            _ = tokio::time::sleep(remaining) => return Err(RetryError::Timeout),
            result = operation() => result,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = is_retryable(&err) && attempt < policy.max_attempts;
                if !retryable {
                    return Err(RetryError::Exhausted(err));
                }

                let delay = policy.delay_for_attempt(attempt);
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let wait = delay.min(remaining);

                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(RetryError::Canceled),
                    _ = tokio::time::sleep(wait) => {},
                }

                attempt += 1;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);

        let calls2 = calls.clone();
        let result: Result<u32, RetryError<&str>> = run_with_retry(
            policy,
            deadline,
            &token,
            |_| true,
            || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err("transient") } else { Ok(42) }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_aborts_immediately() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);

        let calls2 = calls.clone();
        let result: Result<u32, RetryError<&str>> = run_with_retry(
            policy,
            deadline,
            &token,
            |_| false,
            || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal")
                }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted("fatal"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        token.cancel();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);

        let result: Result<u32, RetryError<&str>> =
            run_with_retry(policy, deadline, &token, |_| true, || async { Ok(1) }).await;

        assert!(matches!(result, Err(RetryError::Canceled)));
    }
}
