//! Exponential backoff for transient store failures.

use crate::config::ClaimConfig;
use crate::error::{FlowError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClaimConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClaimConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the attempt following `attempt_number` (1-based)
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let exponent = i32::try_from(attempt_number.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        if !factor.is_finite() {
            return self.max_delay;
        }
        let delay = Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay);

        let jittered_delay = if self.jitter_factor > 0.0 {
            let jitter = fastrand::f64() * self.jitter_factor;
            Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
                .unwrap_or(self.max_delay)
        } else {
            delay
        };

        jittered_delay.min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// Only [`FlowError::is_retryable`] errors are retried. The closure gets the
    /// 1-based attempt number. Exhaustion surfaces as `TransientStoreFailure`
    /// carrying the real attempt count.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt_number = 1;
        loop {
            match attempt(attempt_number).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt_number < self.max_attempts => {
                    let delay = self.delay_for(attempt_number);
                    warn!(
                        operation = operation,
                        attempt = attempt_number,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient store failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt_number += 1;
                }
                Err(FlowError::TransientStoreFailure { reason, .. }) => {
                    return Err(FlowError::TransientStoreFailure {
                        attempts: attempt_number,
                        reason,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(35),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    fn transient() -> FlowError {
        FlowError::TransientStoreFailure {
            attempts: 1,
            reason: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(35));
        assert_eq!(policy.delay_for(60), Duration::from_millis(35));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            max_delay: Duration::from_secs(1),
            ..policy()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy()
            .run("test", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let result: Result<()> = policy().run("test", |_| async { Err(transient()) }).await;
        assert!(matches!(
            result,
            Err(FlowError::TransientStoreFailure { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = policy()
            .run("test", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FlowError::claim_conflict("B", 1, "taken"))
            })
            .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
