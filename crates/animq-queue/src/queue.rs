//! Queue contract and configuration.

use std::sync::Arc;

use animq_models::JobId;
use async_trait::async_trait;
use tracing::info;

use crate::error::QueueResult;
use crate::memory::MemoryQueue;
use crate::redis_queue::RedisQueue;

/// Point-in-time view of the queue, oldest entry first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub size: u64,
    pub job_ids: Vec<JobId>,
}

/// Durable, score-ordered set of job ids.
///
/// Implementations hold at most one entry per job id and must make
/// `pop_min` atomic: concurrent callers never receive the same id.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Insert `job_id` with `score`; `AlreadyQueued` if an entry exists.
    async fn push(&self, job_id: &JobId, score: i64) -> QueueResult<()>;

    /// Remove and return the lowest-score entry; `QueueEmpty` if none.
    async fn pop_min(&self) -> QueueResult<JobId>;

    /// Remove the entry for `job_id`; `NotQueued` if absent.
    async fn remove(&self, job_id: &JobId) -> QueueResult<()>;

    async fn contains(&self, job_id: &JobId) -> QueueResult<bool>;

    async fn snapshot(&self) -> QueueResult<QueueSnapshot>;
}

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackendKind {
    #[default]
    Redis,
    Memory,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Backend selection
    pub backend: QueueBackendKind,
    /// Redis URL
    pub redis_url: String,
    /// Sorted set key holding the queue
    pub queue_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            queue_key: "animq:render_queue".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            backend: match std::env::var("QUEUE_BACKEND")
                .map(|v| v.to_lowercase())
                .as_deref()
            {
                Ok("memory") => QueueBackendKind::Memory,
                _ => QueueBackendKind::Redis,
            },
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            queue_key: std::env::var("QUEUE_KEY")
                .unwrap_or_else(|_| "animq:render_queue".to_string()),
        }
    }
}

/// Build and initialize the configured backend.
pub async fn connect(config: &QueueConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    match config.backend {
        QueueBackendKind::Redis => {
            let queue = RedisQueue::new(config)?;
            queue.init().await?;
            info!("Using Redis queue '{}'", config.queue_key);
            Ok(Arc::new(queue))
        }
        QueueBackendKind::Memory => {
            info!("Using in-memory queue");
            Ok(Arc::new(MemoryQueue::new()))
        }
    }
}
