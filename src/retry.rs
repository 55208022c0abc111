//! Bounded retries with backoff, independent of the sleep primitive.

use std::{fmt::Display, future::Future, time::Duration};

use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub jitter: Duration,
    pub exponent: f64,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed), given a uniform
    /// sample `unit` in `[0, 1)`: `(base + unit * jitter) * attempt^exponent`.
    pub fn delay(&self, attempt: u32, unit: f64) -> Duration {
        let step = self.base.as_secs_f64() + unit * self.jitter.as_secs_f64();

        Duration::from_secs_f64(step * f64::from(attempt).powf(self.exponent))
    }
}

/// Runs `op` until it succeeds or `max_attempts` calls have been made,
/// sleeping `backoff(attempt)` between calls. Returns the last error.
///
/// `op` receives the 1-indexed attempt number.
pub async fn with_retries<T, E, F, Fut, B, S>(
    max_attempts: u32,
    mut backoff: B,
    sleeper: &S,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: FnMut(u32) -> Duration,
    S: Sleeper + ?Sized,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts => {
                let delay = backoff(attempt);
                warn!(attempt, max_attempts, %error, ?delay, "attempt failed, retrying");
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

// -- Tests -------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::test_support::RecordingSleeper;
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(350),
            jitter: Duration::from_millis(250),
            exponent: 1.3,
        }
    }

    #[test]
    fn should_scale_delay_with_attempt() {
        let p = policy();

        let secs = |attempt, unit| p.delay(attempt, unit).as_secs_f64();

        assert!((secs(1, 0.0) - 0.35).abs() < 1e-6);
        assert!((secs(1, 0.5) - 0.475).abs() < 1e-6);
        assert!((secs(3, 0.0) - 0.35 * 3f64.powf(1.3)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn should_return_first_success() {
        let sleeper = RecordingSleeper::default();
        let calls = Cell::new(0);

        let result: Result<u32, String> = with_retries(5, |_| Duration::from_secs(1), &sleeper, |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(format!("fail {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn should_stop_after_budget_with_last_error() {
        let sleeper = RecordingSleeper::default();
        let p = policy();

        let result: Result<(), String> = with_retries(
            p.max_attempts,
            |attempt| p.delay(attempt, 0.0),
            &sleeper,
            |attempt| async move { Err(format!("fail {attempt}")) },
        )
        .await;

        assert_eq!(result, Err("fail 5".to_string()));
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 4);
        assert_eq!(sleeps[0], p.delay(1, 0.0));
        assert_eq!(sleeps[3], p.delay(4, 0.0));
    }

    #[tokio::test]
    async fn should_call_at_least_once() {
        let sleeper = RecordingSleeper::default();

        let result: Result<(), &str> =
            with_retries(0, |_| Duration::ZERO, &sleeper, |_| async { Err("nope") }).await;

        assert_eq!(result, Err("nope"));
        assert!(sleeper.sleeps().is_empty());
    }
}
