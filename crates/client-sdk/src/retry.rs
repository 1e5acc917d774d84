use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{CallContext, DfsError};

/// Delay between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failure, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Last error of a retried call plus how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: DfsError,
}

impl RetryFailure {
    pub fn into_inner(self) -> DfsError {
        self.error
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Three dial attempts, two seconds apart.
    pub const fn dial_default() -> Self {
        Self::new(3, Backoff::Fixed(Duration::from_secs(2)))
    }

    /// A single attempt.
    pub const fn none() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Calls `op` with the attempt number until it succeeds, fails with a
    /// non-retryable error, or runs out of attempts. No delay follows the last
    /// attempt. Cancellation and deadlines of `ctx` end the loop at once.
    pub async fn run<T, F, Fut>(&self, ctx: &CallContext, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DfsError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match ctx.run(op(attempt)).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && error.is_retryable() => {
                    let delay = self.backoff.delay(attempt);
                    debug!(attempt, max_attempts, ?delay, error = %error, "attempt failed, retrying");
                    if let Err(error) = ctx.sleep(delay).await {
                        return Err(RetryFailure {
                            attempts: attempt,
                            error,
                        });
                    }
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
