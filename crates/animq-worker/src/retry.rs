//! Render retry policies.
//!
//! Retrying is opt-in. Between attempts the job stays `Processing`; only
//! the outcome of the last attempt is recorded.

use std::fmt::Debug;
use std::time::Duration;

use crate::error::WorkerError;

/// Decides whether a failed render attempt is tried again.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Delay before the next attempt, or `None` to give up.
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn next_delay(&self, attempt: u32, error: &WorkerError) -> Option<Duration>;
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32, _error: &WorkerError) -> Option<Duration> {
        None
    }
}

/// Retry retryable errors up to a total attempt count with exponential backoff.
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure, doubling afterwards
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BoundedRetry {
    /// Allow `max_attempts` attempts in total, waiting `base_delay` before
    /// the second and doubling after that.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Cap the delay between attempts.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl RetryPolicy for BoundedRetry {
    fn next_delay(&self, attempt: u32, error: &WorkerError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return None;
        }
        Some(self.delay_for_attempt(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retry() {
        assert_eq!(NoRetry.next_delay(1, &WorkerError::render_failed("x")), None);
    }

    #[test]
    fn test_bounded_backoff_doubles_and_caps() {
        let policy = BoundedRetry::new(5, Duration::from_secs(10)).with_max_delay(Duration::from_secs(30));
        let err = WorkerError::render_failed("x");

        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(2, &err), Some(Duration::from_secs(20)));
        assert_eq!(policy.next_delay(3, &err), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(4, &err), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(5, &err), None);
    }

    #[test]
    fn test_cancellation_never_retried() {
        let policy = BoundedRetry::new(3, Duration::from_secs(1));
        assert_eq!(policy.next_delay(1, &WorkerError::Cancelled), None);
    }
}
