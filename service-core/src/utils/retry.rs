//! Retry and timeout combinators for calls to remote collaborators.
//!
//! `with_timeout` races a fallible future against a deadline; `with_retry`
//! re-runs an operation according to a [`RetryPolicy`], optionally wrapping
//! every attempt in `with_timeout`. Neither knows anything about the
//! operation being run.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// The deadline passed before the raced future settled.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation timed out after {}ms", .after.as_millis())]
pub struct TimeoutError {
    pub after: Duration,
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Delay schedule between attempts.
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// `step × attempt` after the given (1-based) attempt.
    Linear { step: Duration },
    /// `initial × multiplier^(attempt-1)`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
    None,
}

impl Backoff {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exp = attempt.saturating_sub(1) as i32;
                let ms = initial.as_millis() as f64 * multiplier.powi(exp);
                Duration::from_millis(ms.min(max.as_millis() as f64) as u64)
            }
            Backoff::None => Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Deadline applied to each individual attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier: 2.0,
            },
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { step },
            attempt_timeout: None,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Race `fut` against `duration`; the first to settle wins.
pub async fn with_timeout<Fut, T, E>(duration: Duration, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(TimeoutError { after: duration }.into()),
    }
}

/// Run `f` until it succeeds, returns a non-retryable error, or the policy's
/// attempts are exhausted. `f` receives the 1-based attempt number.
///
/// A timed-out attempt is treated exactly like any other retryable failure.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display + From<TimeoutError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match policy.attempt_timeout {
            Some(deadline) => with_timeout(deadline, f(attempt)).await,
            None => f(attempt).await,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Call failed with non-retryable error"
                );
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Call failed after max attempts"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = policy.backoff.delay_after(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "Call failed, retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
        #[error(transparent)]
        Timeout(#[from] TimeoutError),
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let backoff = Backoff::Linear {
            step: Duration::from_millis(800),
        };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(800));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(1600));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(300),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_when_future_never_settles() {
        let result: Result<(), TestError> =
            with_timeout(Duration::from_secs(10), std::future::pending()).await;
        match result {
            Err(TestError::Timeout(e)) => assert_eq!(e.after, Duration::from_secs(10)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_linear_backoff_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::linear(3, Duration::from_millis(800));
        let start = Instant::now();

        let counter = calls.clone();
        let result = with_retry(&policy, "test_op", move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(2400));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempts_are_retried() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(800))
            .with_attempt_timeout(Duration::from_secs(10));

        let result = with_retry(&policy, "slow_op", |attempt| async move {
            if attempt < 3 {
                std::future::pending::<()>().await;
            }
            Ok::<_, TestError>("done")
        })
        .await;

        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "test_op", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(
            &RetryPolicy::linear(2, Duration::from_millis(10)),
            "test_op",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            },
        )
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
