//! Job status state machine over the job repository.

use std::path::PathBuf;
use std::sync::Arc;

use animq_models::{FieldPatch, Job, JobId, JobStatus, JobUpdate};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{truncate_message, WorkerError, WorkerResult};
use crate::persistence::JobRepository;

/// The only writer of job status.
///
/// Every change goes through [`StatusStore::transition`], which checks the
/// transition table and keeps `artifact_path` set only on `Completed` jobs
/// and `error_message` only on `Failed` ones.
pub struct StatusStore {
    repo: Arc<dyn JobRepository>,
    /// Serializes read-check-write so two transitions of one job cannot interleave.
    write_lock: Mutex<()>,
    max_error_bytes: usize,
}

impl StatusStore {
    /// Create a store over `repo`. Stored error messages are cut to
    /// `max_error_bytes`.
    pub fn new(repo: Arc<dyn JobRepository>, max_error_bytes: usize) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
            max_error_bytes,
        }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    /// Load a job. `NotFound` for unknown ids.
    pub async fn get(&self, id: &JobId) -> WorkerResult<Job> {
        self.repo.get(id).await
    }

    /// Move a job to `next`.
    ///
    /// Empty or absent `artifact_path` / `error_message` leave the stored
    /// value as is. Fields that do not belong to `next` are cleared.
    pub async fn transition(
        &self,
        id: &JobId,
        next: JobStatus,
        artifact_path: Option<PathBuf>,
        error_message: Option<String>,
    ) -> WorkerResult<Job> {
        let _guard = self.write_lock.lock().await;

        let current = self.repo.get(id).await?;
        current.status.transition(next)?;

        let artifact_path = artifact_path.filter(|p| !p.as_os_str().is_empty());
        let error_message = error_message
            .filter(|m| !m.trim().is_empty())
            .map(|m| truncate_message(&m, self.max_error_bytes));

        let mut update = JobUpdate::status(next);
        match next {
            JobStatus::Completed => {
                update.artifact_path = match artifact_path {
                    Some(path) => FieldPatch::Set(path),
                    None if current.artifact_path.is_some() => FieldPatch::Keep,
                    None => return Err(WorkerError::MissingField("artifact_path")),
                };
                update.error_message = FieldPatch::Clear;
            }
            JobStatus::Failed => {
                update.error_message = match error_message {
                    Some(message) => FieldPatch::Set(message),
                    None if current.error_message.is_some() => FieldPatch::Keep,
                    None => return Err(WorkerError::MissingField("error_message")),
                };
                update.artifact_path = FieldPatch::Clear;
            }
            _ => {
                update.artifact_path = FieldPatch::Clear;
                update.error_message = FieldPatch::Clear;
            }
        }

        let job = self.repo.update_fields(id, &update).await?;
        debug!(job_id = %id, from = %current.status, to = %next, "Job status changed");
        Ok(job)
    }

    /// `Pending -> Queued`.
    pub async fn mark_queued(&self, id: &JobId) -> WorkerResult<Job> {
        self.transition(id, JobStatus::Queued, None, None).await
    }

    /// `Queued -> Processing`.
    pub async fn mark_processing(&self, id: &JobId) -> WorkerResult<Job> {
        self.transition(id, JobStatus::Processing, None, None).await
    }

    /// `Processing -> Completed` with the stored artifact.
    pub async fn complete(&self, id: &JobId, artifact_path: PathBuf) -> WorkerResult<Job> {
        self.transition(id, JobStatus::Completed, Some(artifact_path), None)
            .await
    }

    /// `Processing -> Failed` with a (truncated) error message.
    pub async fn fail(&self, id: &JobId, message: impl Into<String>) -> WorkerResult<Job> {
        self.transition(id, JobStatus::Failed, None, Some(message.into()))
            .await
    }

    /// Put a `Queued` job back to `Pending` after its queue entry could not
    /// be written.
    ///
    /// This undoes [`StatusStore::mark_queued`] and is not a lifecycle edge.
    /// Jobs in any other status are returned unchanged.
    pub(crate) async fn revert_queued(&self, id: &JobId) -> WorkerResult<Job> {
        let _guard = self.write_lock.lock().await;

        let current = self.repo.get(id).await?;
        if current.status != JobStatus::Queued {
            return Ok(current);
        }
        let job = self
            .repo
            .update_fields(id, &JobUpdate::status(JobStatus::Pending))
            .await?;
        debug!(job_id = %id, "Queued status withdrawn");
        Ok(job)
    }

    /// Administrative deletion, allowed from any state.
    pub async fn delete(&self, id: &JobId) -> WorkerResult<()> {
        let _guard = self.write_lock.lock().await;
        self.repo.delete(id).await
    }
}
