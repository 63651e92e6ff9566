//! Bounded retry with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Attempt budget and backoff curve for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below one are treated as one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Succeeded {
        /// Value returned by the successful attempt.
        value: T,
        /// Attempts made, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Error returned by the final attempt.
        error: E,
        /// Attempts made.
        attempts: u32,
    },
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) if attempt >= max_attempts => {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
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

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = policy(10);
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
        assert_eq!(policy.delay_for(200), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let outcome = policy(3)
            .run(|_attempt| {
                let calls = calls.clone();
                async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if call < 3 { Err("transient") } else { Ok("answer") }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                assert_eq!(value, "answer");
                assert_eq!(attempts, 3);
            }
            RetryOutcome::Exhausted { .. } => panic!("expected success"),
        }
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_with_last_error() {
        let started = Instant::now();
        let outcome: RetryOutcome<(), String> = policy(3)
            .run(|attempt| async move { Err(format!("failure {attempt}")) })
            .await;

        match outcome {
            RetryOutcome::Exhausted { error, attempts } => {
                assert_eq!(error, "failure 3");
                assert_eq!(attempts, 3);
            }
            RetryOutcome::Succeeded { .. } => panic!("expected exhaustion"),
        }
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let outcome: RetryOutcome<(), &str> = policy(0).run(|_| async { Err("nope") }).await;
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
    }
}
