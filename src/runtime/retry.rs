// src/runtime/retry.rs
//! Retry with exponential or linear backoff
//!
//! Errors are retried only while [`UplinkError::is_retryable`] holds, so a
//! missing local file or a cancelled transfer fails on the first attempt.

use crate::utils::errors::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base, 2*base, 4*base, ...
    Exponential,
    /// base, 2*base, 3*base, ...
    Linear,
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Random jitter as a fraction of the delay (0.1 = ±10%)
    pub jitter_percent: f64,
}

impl RetryPolicy {
    /// 5 attempts, 100ms doubling
    pub fn exponential() -> Self {
        Self {
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
            jitter_percent: 0.1,
        }
    }

    /// 5 attempts, 500ms steps
    pub fn linear() -> Self {
        Self {
            backoff: Backoff::Linear,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
            jitter_percent: 0.1,
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::exponential()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_percent = 0.0;
        self
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let raw_ms = match self.backoff {
            Backoff::Exponential => base_ms * 2f64.powi(attempt.min(31) as i32),
            Backoff::Linear => base_ms * (attempt as f64 + 1.0),
        };
        let capped_ms = raw_ms.min(max_ms);

        let jitter = if self.jitter_percent > 0.0 && capped_ms > 0.0 {
            let range = capped_ms * self.jitter_percent;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((capped_ms + jitter).max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(label, retries = attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if !e.is_retryable() {
                    debug!(label, error = %e, "Not retrying non-retryable error");
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    warn!(
                        label,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff shorthand
pub async fn retry_with_exponential_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    debug_assert_eq!(policy.backoff, Backoff::Exponential);
    retry_with_backoff(policy, label, operation).await
}

/// Linear backoff shorthand
pub async fn retry_with_linear_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    debug_assert_eq!(policy.backoff, Backoff::Linear);
    retry_with_backoff(policy, label, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::UplinkError;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn exponential_delays_double() {
        let policy = RetryPolicy::exponential().without_jitter();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn linear_delays_step() {
        let policy = RetryPolicy::linear().without_jitter();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1500));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::exponential().without_jitter();
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::exponential();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2).as_millis();
            assert!((360..=440).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = retry_with_backoff(&RetryPolicy::exponential(), "test", || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UplinkError::Io("flaky".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let policy = RetryPolicy::linear().with_max_attempts(3);

        let result: Result<()> = retry_with_linear_backoff(&policy, "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(UplinkError::Transfer {
                    status: Some(500),
                    message: "boom".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result: Result<()> =
            retry_with_exponential_backoff(&RetryPolicy::exponential(), "test", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(UplinkError::FileNotFound(PathBuf::from("/missing")))
                }
            })
            .await;

        assert!(matches!(result, Err(UplinkError::FileNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
