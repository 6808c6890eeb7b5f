//! Bounded retry with backoff.

use std::future::Future;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait the policy's backoff delay for this attempt, then retry.
    Backoff,
    /// Wait a caller-supplied delay (e.g. a `Retry-After` hint), then retry.
    After(Duration),
    /// Give up and return the error.
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
        }
    }

    /// No waiting at all; useful in tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    #[must_use]
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, decision: RetryDecision, attempt_index: u32) -> Option<Duration> {
        match decision {
            RetryDecision::Backoff => Some(self.delay_for_attempt(attempt_index)),
            RetryDecision::After(hint) => Some(hint.min(self.max_delay)),
            RetryDecision::Stop => None,
        }
    }
}

/// Runs `op` until it succeeds, the classifier says stop, or the attempt
/// budget is spent. `op` receives the zero-based attempt index.
pub async fn retry<T, E, Op, Fut, C>(policy: &RetryPolicy, classify: C, mut op: Op) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(err);
        }

        let Some(delay) = policy.delay_for(classify(&err), attempt - 1) else {
            return Err(err);
        };

        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
