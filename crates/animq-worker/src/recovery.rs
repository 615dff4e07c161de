//! Startup recovery of jobs left behind by a previous worker process.

use animq_models::JobStatus;
use tracing::{info, warn};

use crate::error::WorkerResult;
use crate::metrics;
use crate::queue::JobQueue;
use crate::status::StatusStore;

/// Error recorded on jobs a previous process left in `Processing`.
pub const INTERRUPTED_MESSAGE: &str = "render interrupted by worker restart";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `Processing` jobs marked `Failed`
    pub interrupted: u64,
    /// `Queued` jobs whose queue entry was restored
    pub requeued: u64,
}

/// Reconcile job status with the queue after a restart.
///
/// Must run before the pool starts: any `Processing` job at that point
/// belongs to a dead worker.
pub async fn recover_interrupted(
    status: &StatusStore,
    queue: &JobQueue,
) -> WorkerResult<RecoveryReport> {
    let mut report = RecoveryReport::default();

    let stuck = status
        .repository()
        .list_by_status(&[JobStatus::Processing, JobStatus::Queued])
        .await?;

    for job in stuck {
        match job.status {
            JobStatus::Processing => match status.fail(&job.id, INTERRUPTED_MESSAGE).await {
                Ok(_) => {
                    metrics::record_job_failed("interrupted");
                    report.interrupted += 1;
                }
                Err(e) => warn!(job_id = %job.id, "Failed to fail interrupted job: {}", e),
            },
            JobStatus::Queued => {
                if queue.contains(&job.id).await? {
                    continue;
                }
                match queue.restore_entry(&job.id, job.updated_at.timestamp_millis()).await {
                    Ok(()) => report.requeued += 1,
                    Err(e) if e.is_already_queued() => {}
                    Err(e) => warn!(job_id = %job.id, "Failed to restore queue entry: {}", e),
                }
            }
            _ => {}
        }
    }

    if report != RecoveryReport::default() {
        info!(
            interrupted = report.interrupted,
            requeued = report.requeued,
            "Recovered jobs from previous run"
        );
    }
    Ok(report)
}
