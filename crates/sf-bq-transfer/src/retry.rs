//! Caller-side retry with capped exponential backoff.
//!
//! Table tasks never retry themselves; the orchestrator's
//! `retry_failed` wraps whole-table re-runs in a [`RetryPolicy`].

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier said the error will not go away.
    Fatal(E),
    /// Still failing after the last allowed attempt.
    AttemptsExceeded(E),
}

impl<E> RetryError<E> {
    /// Last error seen, whatever the reason for stopping.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::AttemptsExceeded(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Default delays with a different attempt count.
    pub fn with_attempts(max_attempts: usize) -> Self {
        let defaults = Self::default();
        Self::new(max_attempts, defaults.base_delay, defaults.max_delay)
    }

    /// Run `op` until it succeeds, `classify` says stop, or attempts run out.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if classify(&err) == RetryDisposition::Stop {
                        return Err(RetryError::Fatal(err));
                    }
                    if attempt + 1 >= self.max_attempts {
                        return Err(RetryError::AttemptsExceeded(err));
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "attempt {}/{} failed, retrying in {:?}",
                        attempt + 1,
                        self.max_attempts,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay before attempt `attempt + 1`: base * 2^attempt, capped.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
