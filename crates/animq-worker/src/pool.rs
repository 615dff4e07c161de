//! Worker pool: fixed set of loops pulling jobs from the queue.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use animq_models::JobId;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::executor::RenderExecutor;
use crate::limiter::{RenderLimiter, RenderPermit};
use crate::metrics;
use crate::queue::JobQueue;
use crate::status::StatusStore;

/// Message recorded for jobs dequeued without script text.
pub const MISSING_SCRIPT_MESSAGE: &str = "no script to render";

enum PoolState {
    Stopped,
    Running {
        stop: CancellationToken,
        workers: Vec<JoinHandle<()>>,
    },
}

impl PoolState {
    /// Loops also exit when the token passed to `start` is cancelled; once
    /// all of them are gone the pool counts as stopped.
    fn reap(&mut self) {
        if let PoolState::Running { workers, .. } = self {
            if workers.iter().all(JoinHandle::is_finished) {
                debug!("All worker loops have exited");
                *self = PoolState::Stopped;
            }
        }
    }
}

/// Everything a worker loop needs, shared across loops.
struct WorkerShared {
    queue: Arc<JobQueue>,
    status: Arc<StatusStore>,
    executor: Arc<RenderExecutor>,
    limiter: RenderLimiter,
    backoff: Duration,
}

/// Runs one loop per render token. Each loop handles one job at a time.
///
/// A loop takes a token from the executor's limiter before it dequeues, so
/// the limiter alone bounds concurrent renders and a job stays in the
/// queue until a token is free.
pub struct WorkerPool {
    shared: Arc<WorkerShared>,
    workers: usize,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create a stopped pool of `workers` loops (at least one).
    ///
    /// More loops than limiter tokens only adds idle waiters.
    pub fn new(
        queue: Arc<JobQueue>,
        status: Arc<StatusStore>,
        executor: Arc<RenderExecutor>,
        workers: usize,
        backoff: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                queue,
                status,
                limiter: executor.limiter().clone(),
                executor,
                backoff,
            }),
            workers: workers.max(1),
            state: Mutex::new(PoolState::Stopped),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.reap();
        state
    }

    /// Whether any worker loop is still running.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), PoolState::Running { .. })
    }

    /// Number of loops launched by `start`.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Launch the worker loops and return.
    ///
    /// `ctx` is handed to every render; cancelling it also ends the loops,
    /// after which the pool may be started again. Fails `AlreadyRunning`
    /// while loops from an earlier start are alive.
    pub fn start(&self, ctx: &CancellationToken) -> WorkerResult<()> {
        let mut state = self.lock_state();
        if matches!(*state, PoolState::Running { .. }) {
            return Err(WorkerError::AlreadyRunning);
        }

        let stop = CancellationToken::new();
        let workers = (0..self.workers)
            .map(|worker_id| {
                let shared = Arc::clone(&self.shared);
                let stop = stop.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { worker_loop(worker_id, shared, stop, ctx).await })
            })
            .collect();

        *state = PoolState::Running { stop, workers };
        info!("Started worker pool with {} workers", self.workers);
        Ok(())
    }

    /// Ask the loops to exit after their current job and wait for them.
    /// In-flight renders are not interrupted.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), PoolState::Stopped);
        let PoolState::Running { stop, workers } = previous else {
            return;
        };

        info!("Stopping worker pool, waiting for in-flight renders");
        stop.cancel();
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<WorkerShared>,
    stop: CancellationToken,
    ctx: CancellationToken,
) {
    debug!(worker_id, "Worker loop started");

    loop {
        let permit = tokio::select! {
            _ = stop.cancelled() => break,
            permit = shared.limiter.acquire(&ctx) => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if stop.is_cancelled() || ctx.is_cancelled() {
            break;
        }

        match shared.queue.dequeue().await {
            Ok(job_id) => process_job(worker_id, &shared, &ctx, job_id, permit).await,
            Err(e) => {
                drop(permit);
                if !e.is_queue_empty() {
                    warn!(worker_id, "Dequeue failed: {}", e);
                }
                tokio::select! {
                    _ = tokio::time::sleep(shared.backoff) => {}
                    _ = stop.cancelled() => break,
                    _ = ctx.cancelled() => break,
                }
            }
        }
    }

    debug!(worker_id, "Worker loop exited");
}

async fn process_job(
    worker_id: usize,
    shared: &Arc<WorkerShared>,
    ctx: &CancellationToken,
    job_id: JobId,
    permit: RenderPermit,
) {
    let job = match shared.status.get(&job_id).await {
        Ok(job) => job,
        Err(e) => {
            warn!(worker_id, job_id = %job_id, "Dropping dequeued job: {}", e);
            return;
        }
    };

    if job.script.trim().is_empty() {
        drop(permit);
        warn!(worker_id, job_id = %job_id, "Job has no script");
        let recorded = match shared.status.mark_processing(&job_id).await {
            Ok(_) => shared.status.fail(&job_id, MISSING_SCRIPT_MESSAGE).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match recorded {
            Ok(()) => metrics::record_job_failed("render_failed"),
            Err(e) => error!(worker_id, job_id = %job_id, "Failed to record missing script: {}", e),
        }
        return;
    }

    debug!(worker_id, job_id = %job_id, "Processing job");

    // A panicking render must not take the loop down with it.
    let executor = Arc::clone(&shared.executor);
    let render_ctx = ctx.clone();
    let render_id = job_id.clone();
    let handle = tokio::spawn(async move {
        executor
            .render_with_permit(permit, &render_ctx, &render_id, &job.script)
            .await
    });

    match handle.await {
        Ok(Ok(path)) => {
            debug!(worker_id, job_id = %job_id, "Rendered to {}", path.display());
        }
        Ok(Err(e)) if e.is_terminal_for_job() => {
            debug!(worker_id, job_id = %job_id, "Render failed: {}", e);
        }
        Ok(Err(e)) => {
            error!(worker_id, job_id = %job_id, "Render could not start: {}", e);
        }
        Err(join_err) => {
            error!(worker_id, job_id = %job_id, "Render task panicked: {}", join_err);
            if let Err(e) = shared.status.fail(&job_id, "render task panicked").await {
                error!(worker_id, job_id = %job_id, "Failed to record panic: {}", e);
            }
            metrics::record_job_failed("panic");
        }
    }
}
