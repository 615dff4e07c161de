//! Global render concurrency limit.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{WorkerError, WorkerResult};

/// Pool of render tokens. At most `capacity` renders hold one at a time.
///
/// This is the only concurrency gate in the pipeline. The worker pool takes
/// a token before it dequeues, so a job never leaves the queue until it can
/// start rendering.
#[derive(Debug, Clone)]
pub struct RenderLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held render token. Dropping it returns the token, including on
/// unwind or when the owning task is aborted.
#[derive(Debug)]
pub struct RenderPermit {
    _permit: OwnedSemaphorePermit,
}

impl RenderLimiter {
    /// Create a limiter with `capacity` tokens (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a token. Gives up with `Cancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> WorkerResult<RenderPermit> {
        let permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| WorkerError::Cancelled)?
            }
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
        };
        Ok(RenderPermit { _permit: permit })
    }

    /// Total number of tokens.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tokens_are_returned_on_drop() {
        let limiter = RenderLimiter::new(2);
        let cancel = CancellationToken::new();

        let a = limiter.acquire(&cancel).await.unwrap();
        let b = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        drop(b);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_waiter_blocks_until_release() {
        let limiter = RenderLimiter::new(1);
        let cancel = CancellationToken::new();
        let held = limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let limiter = RenderLimiter::new(1);
        let cancel = CancellationToken::new();
        let _held = limiter.acquire(&cancel).await.unwrap();

        let other = CancellationToken::new();
        other.cancel();
        let err = limiter.acquire(&other).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_token_released_when_task_panics() {
        let limiter = RenderLimiter::new(1);
        let task_limiter = limiter.clone();
        let result = tokio::spawn(async move {
            let _permit = task_limiter.acquire(&CancellationToken::new()).await.unwrap();
            panic!("render blew up");
        })
        .await;

        assert!(result.unwrap_err().is_panic());
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        assert_eq!(RenderLimiter::new(0).capacity(), 1);
    }
}
