//! Wiring of the pipeline services.

use std::sync::Arc;

use animq_queue::QueueBackend;

use crate::cleanup::CleanupScheduler;
use crate::config::{CleanupConfig, WorkerConfig};
use crate::executor::RenderExecutor;
use crate::limiter::RenderLimiter;
use crate::persistence::JobRepository;
use crate::pool::WorkerPool;
use crate::queue::JobQueue;
use crate::status::StatusStore;

/// Shared services of one worker process.
///
/// `max_concurrent_renders` sizes the limiter, which is the single render
/// gate. The pool runs one loop per token so no loop idles without one.
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub status: Arc<StatusStore>,
    pub queue: Arc<JobQueue>,
    pub executor: Arc<RenderExecutor>,
    pub pool: Arc<WorkerPool>,
}

impl WorkerContext {
    /// Build every service around `repo` and `backend`.
    ///
    /// The limiter gets `max_concurrent_renders` tokens and the pool one loop
    /// per token.
    pub fn new(
        config: WorkerConfig,
        repo: Arc<dyn JobRepository>,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        let config = Arc::new(config);
        let status = Arc::new(StatusStore::new(repo, config.error_message_max_bytes));
        let queue = Arc::new(JobQueue::new(backend, Arc::clone(&status)));
        let limiter = RenderLimiter::new(config.max_concurrent_renders);
        let executor = Arc::new(RenderExecutor::new(
            Arc::clone(&config),
            Arc::clone(&status),
            limiter.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&status),
            Arc::clone(&executor),
            limiter.capacity(),
            config.poll_backoff,
        ));

        Self {
            config,
            status,
            queue,
            executor,
            pool,
        }
    }

    /// Render tokens shared by the pool and direct `render` calls.
    pub fn limiter(&self) -> &RenderLimiter {
        self.executor.limiter()
    }

    /// Retention sweeper over this context's queue, status store and
    /// directories.
    pub fn cleanup(&self, cleanup: CleanupConfig) -> Arc<CleanupScheduler> {
        Arc::new(CleanupScheduler::new(
            Arc::clone(&self.status),
            Arc::clone(&self.queue),
            cleanup,
            self.config.output_dir.clone(),
            self.config.work_dir.clone(),
            self.config.artifact_extension.clone(),
        ))
    }
}
