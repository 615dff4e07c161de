//! Queue error types.

use animq_models::JobId;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job already queued: {0}")]
    AlreadyQueued(JobId),

    #[error("Job not queued: {0}")]
    NotQueued(JobId),

    #[error("Queue is empty")]
    QueueEmpty,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid queue entry: {0}")]
    InvalidEntry(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Nothing to dequeue; the caller should back off.
    pub fn is_queue_empty(&self) -> bool {
        matches!(self, QueueError::QueueEmpty)
    }

    pub fn is_not_queued(&self) -> bool {
        matches!(self, QueueError::NotQueued(_))
    }

    pub fn is_already_queued(&self) -> bool {
        matches!(self, QueueError::AlreadyQueued(_))
    }

    /// Errors the immediate caller is expected to handle (conflict, backoff).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueueError::AlreadyQueued(_) | QueueError::NotQueued(_) | QueueError::QueueEmpty
        )
    }
}
