//! Bounded retry with exponential backoff
//!
//! One retry policy for every upstream call. Whether a failure is worth
//! repeating is decided by a classifier function supplied per call, so the
//! policy can be exercised without a network.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::time::error::Elapsed;
use tracing::{debug, warn};

use crate::error::{ErrorClass, ServiceError};

/// Floor for the first backoff interval; retries never fire back-to-back
const MIN_INITIAL_INTERVAL: Duration = Duration::from_millis(10);

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (0 is treated as 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    pub max_interval: Duration,

    /// Growth factor between consecutive delays (values below 1.0 are treated as 1.0)
    pub multiplier: f64,

    /// Deadline for each individual attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryConfig {{ max_attempts: {}, initial_interval: {:?}, max_interval: {:?}, multiplier: {}, attempt_timeout: {:?} }}",
            self.max_attempts,
            self.initial_interval,
            self.max_interval,
            self.multiplier,
            self.attempt_timeout
        )
    }
}

impl RetryConfig {
    /// Number of attempts the executor will make at most
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// A fresh, jitter-free backoff schedule
    fn schedule(&self) -> ExponentialBackoff {
        let initial = self.initial_interval.max(MIN_INITIAL_INTERVAL);
        ExponentialBackoffBuilder::new()
            .with_initial_interval(initial)
            .with_max_interval(self.max_interval.max(initial))
            .with_multiplier(self.multiplier.max(1.0))
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay slept after failed attempt number `attempt` (1-based)
    ///
    /// Non-decreasing in `attempt` and never zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut schedule = self.schedule();
        for _ in 1..attempt.max(1) {
            schedule.next_backoff();
        }
        schedule.next_backoff().unwrap_or(schedule.max_interval)
    }
}

/// Terminal outcome of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Error from the last attempt
    pub error: E,

    /// Attempts made, including the failing one
    pub attempts: u32,

    /// Classification of the last error
    pub class: ErrorClass,
}

impl<E> RetryFailure<E> {
    /// True when the attempt budget ran out on transient failures
    pub fn is_exhausted(&self) -> bool {
        self.class == ErrorClass::Retryable
    }

    /// True when a non-retryable error stopped the loop
    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

/// Executor for retry operations with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` under the policy, classifying each failure with `classify`
    ///
    /// The operation receives the 1-based attempt number. An attempt that
    /// exceeds `attempt_timeout` fails with the error converted from
    /// `Elapsed`, and is classified like any other error.
    pub async fn execute<F, Fut, T, E, C>(
        &self,
        operation_name: &str,
        mut operation: F,
        classify: C,
    ) -> std::result::Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Elapsed> + fmt::Display,
        C: Fn(&E) -> ErrorClass,
    {
        let max_attempts = self.config.attempts();
        let mut schedule = self.config.schedule();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match self.config.attempt_timeout {
                Some(deadline) => match tokio::time::timeout(deadline, operation(attempt)).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(E::from(elapsed)),
                },
                None => operation(attempt).await,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = %operation_name, attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            if class == ErrorClass::Fatal || attempt >= max_attempts {
                warn!(
                    operation = %operation_name,
                    attempt,
                    max_attempts,
                    class = %class,
                    error = %error,
                    "Giving up on upstream call"
                );
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    class,
                });
            }

            let delay = schedule.next_backoff().unwrap_or(schedule.max_interval);
            warn!(
                operation = %operation_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable upstream failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// `execute` for operations failing with `ServiceError`, classified by `ServiceError::class`
    pub async fn execute_service<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> std::result::Result<T, RetryFailure<ServiceError>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        self.execute(operation_name, operation, ServiceError::class).await
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl From<Elapsed> for ServiceError {
    fn from(_: Elapsed) -> Self {
        ServiceError::timeout("Upstream call exceeded its deadline")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(100),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_delay_schedule_is_monotone_and_capped() {
        let config = RetryConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(500),
            multiplier: 2.0,
            ..RetryConfig::default()
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(500));
        assert_eq!(config.delay_for(9), Duration::from_millis(500));

        let mut previous = Duration::ZERO;
        for attempt in 1..12 {
            let delay = config.delay_for(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_degenerate_config_still_backs_off() {
        let config = RetryConfig {
            max_attempts: 0,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 0.5,
            attempt_timeout: None,
        };

        assert_eq!(config.attempts(), 1);
        assert!(config.delay_for(1) > Duration::ZERO);
        assert!(config.delay_for(2) >= config.delay_for(1));
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let retry = RetryExecutor::new(fast_config(3));
        let result = retry
            .execute_service("test", |_| async { Ok::<_, ServiceError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_custom_classifier_overrides_error_kind() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = RetryExecutor::new(fast_config(4));

        let counter = Arc::clone(&calls);
        let result = retry
            .execute(
                "test",
                move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ServiceError::network("would normally retry"))
                    }
                },
                |_: &ServiceError| ErrorClass::Fatal,
            )
            .await;

        let failure = result.unwrap_err();
        assert!(failure.is_fatal());
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let retry = RetryExecutor::new(RetryConfig {
            attempt_timeout: Some(Duration::from_millis(50)),
            ..fast_config(2)
        });

        let result = retry
            .execute_service("slow", |attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, ServiceError>(attempt)
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
