//! Exponential backoff retry policy.
//!
//! Shared by the notification dispatcher (retrying provider backpressure) and
//! the geocoding background refresh (retrying transient provider failures).
//! Attempt `k` that fails with a retryable error is followed by a wait of
//! `base_delay * multiplier^(k-1)`, optionally capped by `max_delay`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Rejected retry configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidRetryPolicy {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// Multipliers below 1.0 would shrink delays between attempts.
    #[error("backoff multiplier must be a finite number >= 1.0, got {0}")]
    Multiplier(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Option<Duration>,
}

/// Successful result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error seen once the policy gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    /// `true` when the attempt budget ran out, `false` when the error was not retryable.
    pub exhausted: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    pub fn validate(&self) -> Result<(), InvalidRetryPolicy> {
        if self.max_attempts == 0 {
            return Err(InvalidRetryPolicy::ZeroAttempts);
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(InvalidRetryPolicy::Multiplier(self.multiplier));
        }
        Ok(())
    }

    /// Wait that follows the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. `operation` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<Attempted<T>, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    if !is_retryable(&error) {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                            exhausted: false,
                        });
                    }
                    if attempt >= max_attempts {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                            exhausted: true,
                        });
                    }

                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 4 attempts, 1s base delay, doubling.
    fn default() -> Self {
        Self::new(4, Duration::from_secs(1), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::time::Instant;

    #[test]
    fn test_delay_schedule_is_exponential() {
        let policy = RetryPolicy::new(4, Duration::from_millis(500), 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_cap() {
        let policy =
            RetryPolicy::new(10, Duration::from_secs(1), 3.0).with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(3));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(9), Duration::from_secs(5));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert_eq!(
            RetryPolicy::new(0, Duration::from_secs(1), 2.0).validate(),
            Err(InvalidRetryPolicy::ZeroAttempts)
        );
        assert_eq!(
            RetryPolicy::new(3, Duration::from_secs(1), 0.5).validate(),
            Err(InvalidRetryPolicy::Multiplier(0.5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_budget_with_non_decreasing_delays() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 2.0);
        let started = RefCell::new(Vec::new());

        let result: Result<Attempted<()>, _> = policy
            .run(
                |_| {
                    started.borrow_mut().push(Instant::now());
                    async { Err::<(), _>("busy") }
                },
                |_| true,
            )
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 4);
        assert!(failure.exhausted);

        let started = started.into_inner();
        assert_eq!(started.len(), 4);
        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] <= g[1]), "gaps: {gaps:?}");
        assert!(gaps[0] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 2.0);
        let calls = RefCell::new(0);

        let result: Result<Attempted<()>, _> = policy
            .run(
                |_| {
                    *calls.borrow_mut() += 1;
                    async { Err::<(), _>("fatal") }
                },
                |err| *err != "fatal",
            )
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(*calls.borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10), 2.0);

        let result = policy
            .run(
                |attempt| async move {
                    if attempt < 3 { Err("busy") } else { Ok(attempt * 10) }
                },
                |_| true,
            )
            .await
            .unwrap();

        assert_eq!(result.value, 30);
        assert_eq!(result.attempts, 3);
    }
}
