//! Job queue service: queue entries kept in step with job status.

use std::sync::Arc;

use animq_models::{InvalidTransition, Job, JobId, JobStatus, NewJob};
use animq_queue::{QueueBackend, QueueError, QueueSnapshot};
use chrono::Utc;
use tracing::{info, warn};

use crate::error::WorkerResult;
use crate::metrics;
use crate::status::StatusStore;

/// Durable, oldest-first queue of job ids.
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    status: Arc<StatusStore>,
}

impl JobQueue {
    /// Combine a queue backend with the status store it keeps in step.
    pub fn new(backend: Arc<dyn QueueBackend>, status: Arc<StatusStore>) -> Self {
        Self { backend, status }
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Mark a `Pending` job `Queued` and add its queue entry.
    ///
    /// The status is written first, so a worker can never pop an entry
    /// whose job is still `Pending`. If the entry cannot be written the job
    /// goes back to `Pending`.
    ///
    /// # Errors
    /// * `NotFound` for unknown jobs
    /// * `AlreadyQueued` if the job is already waiting in the queue
    /// * `InvalidTransition` for jobs past `Queued`
    pub async fn enqueue(&self, job_id: &JobId) -> WorkerResult<()> {
        let job = self.status.get(job_id).await?;
        if job.status == JobStatus::Queued {
            return Err(QueueError::AlreadyQueued(job_id.clone()).into());
        }

        self.status.mark_queued(job_id).await?;

        if let Err(e) = self
            .backend
            .push(job_id, Utc::now().timestamp_millis())
            .await
        {
            if let Err(rollback) = self.status.revert_queued(job_id).await {
                warn!(job_id = %job_id, "Failed to revert queued status: {}", rollback);
            }
            return Err(e.into());
        }

        metrics::record_job_enqueued();
        info!(job_id = %job_id, owner_id = %job.owner_id, "Job enqueued");
        Ok(())
    }

    /// Take the oldest entry. `QueueEmpty` if there is none.
    pub async fn dequeue(&self) -> WorkerResult<JobId> {
        Ok(self.backend.pop_min().await?)
    }

    /// Drop a job's entry. `NotQueued` if there is none.
    pub async fn remove(&self, job_id: &JobId) -> WorkerResult<()> {
        Ok(self.backend.remove(job_id).await?)
    }

    /// Whether `job_id` has a queue entry.
    pub async fn contains(&self, job_id: &JobId) -> WorkerResult<bool> {
        Ok(self.backend.contains(job_id).await?)
    }

    /// Size and ids, oldest first.
    pub async fn status(&self) -> WorkerResult<QueueSnapshot> {
        let snapshot = self.backend.snapshot().await?;
        metrics::set_queue_length(snapshot.size);
        Ok(snapshot)
    }

    /// Re-insert the entry for a job that is already `Queued`.
    pub(crate) async fn restore_entry(&self, job_id: &JobId, score: i64) -> WorkerResult<()> {
        Ok(self.backend.push(job_id, score).await?)
    }

    /// Administrative deletion: withdraw the entry, then the record.
    pub async fn delete_job(&self, job_id: &JobId) -> WorkerResult<()> {
        if let Err(e) = self.remove(job_id).await {
            if !e.is_not_queued() {
                return Err(e);
            }
        }
        self.status.delete(job_id).await?;
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Submit the script of a `Failed` job again as a new job.
    ///
    /// The failed job keeps its record and error; the returned job is
    /// already `Queued`.
    pub async fn resubmit(&self, job_id: &JobId) -> WorkerResult<Job> {
        let failed = self.status.get(job_id).await?;
        if failed.status != JobStatus::Failed {
            return Err(InvalidTransition {
                from: failed.status,
                to: JobStatus::Pending,
            }
            .into());
        }

        let retry = self
            .status
            .repository()
            .create(NewJob::new(failed.owner_id.as_str(), failed.script))
            .await?;
        self.enqueue(&retry.id).await?;
        info!(job_id = %retry.id, resubmitted_from = %job_id, "Job resubmitted");
        self.status.get(&retry.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::persistence::{InMemoryJobRepository, JobRepository};
    use animq_queue::{MemoryQueue, QueueResult};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Backend whose `push` lands the entry, then stalls before returning.
    struct SlowPush {
        inner: MemoryQueue,
        delay: Duration,
    }

    #[async_trait]
    impl QueueBackend for SlowPush {
        async fn push(&self, job_id: &JobId, score: i64) -> QueueResult<()> {
            self.inner.push(job_id, score).await?;
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn pop_min(&self) -> QueueResult<JobId> {
            self.inner.pop_min().await
        }

        async fn remove(&self, job_id: &JobId) -> QueueResult<()> {
            self.inner.remove(job_id).await
        }

        async fn contains(&self, job_id: &JobId) -> QueueResult<bool> {
            self.inner.contains(job_id).await
        }

        async fn snapshot(&self) -> QueueResult<QueueSnapshot> {
            self.inner.snapshot().await
        }
    }

    async fn setup() -> (JobQueue, Arc<StatusStore>, Arc<InMemoryJobRepository>) {
        let repo = Arc::new(InMemoryJobRepository::new());
        let status = Arc::new(StatusStore::new(repo.clone(), 4000));
        let queue = JobQueue::new(Arc::new(MemoryQueue::new()), Arc::clone(&status));
        (queue, status, repo)
    }

    #[tokio::test]
    async fn test_enqueue_marks_queued() {
        let (queue, status, repo) = setup().await;
        let job = repo.create(NewJob::new("u", "s")).await.unwrap();

        queue.enqueue(&job.id).await.unwrap();

        assert_eq!(status.get(&job.id).await.unwrap().status, JobStatus::Queued);
        let snapshot = queue.status().await.unwrap();
        assert_eq!(snapshot.size, 1);
        assert_eq!(snapshot.job_ids, vec![job.id]);
    }

    #[tokio::test]
    async fn test_double_enqueue_rejected() {
        let (queue, status, repo) = setup().await;
        let job = repo.create(NewJob::new("u", "s")).await.unwrap();

        queue.enqueue(&job.id).await.unwrap();
        let err = queue.enqueue(&job.id).await.unwrap_err();

        assert!(err.is_already_queued());
        assert_eq!(queue.status().await.unwrap().size, 1);
        assert_eq!(status.get(&job.id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_job() {
        let (queue, _, _) = setup().await;
        let err = queue.enqueue(&JobId::from("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(queue.status().await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejected_for_job_in_flight() {
        let (queue, status, repo) = setup().await;
        let job = repo.create(NewJob::new("u", "s")).await.unwrap();
        queue.enqueue(&job.id).await.unwrap();
        queue.dequeue().await.unwrap();
        status.mark_processing(&job.id).await.unwrap();

        let err = queue.enqueue(&job.id).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidTransition(_)));
        assert!(!queue.contains(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_dequeue_is_oldest_first() {
        let (queue, _, repo) = setup().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let job = repo.create(NewJob::new("u", format!("s{i}"))).await.unwrap();
            queue.enqueue(&job.id).await.unwrap();
            ids.push(job.id);
        }

        for expected in &ids {
            assert_eq!(&queue.dequeue().await.unwrap(), expected);
        }
        assert!(queue.dequeue().await.unwrap_err().is_queue_empty());
    }

    #[tokio::test]
    async fn test_remove_not_queued() {
        let (queue, _, _) = setup().await;
        assert!(queue.remove(&JobId::from("x")).await.unwrap_err().is_not_queued());
    }

    #[tokio::test]
    async fn test_delete_job_removes_entry_and_record() {
        let (queue, status, repo) = setup().await;
        let queued = repo.create(NewJob::new("u", "s")).await.unwrap();
        queue.enqueue(&queued.id).await.unwrap();
        let pending = repo.create(NewJob::new("u", "s")).await.unwrap();

        queue.delete_job(&queued.id).await.unwrap();
        queue.delete_job(&pending.id).await.unwrap();

        assert!(!queue.contains(&queued.id).await.unwrap());
        assert!(status.get(&queued.id).await.unwrap_err().is_not_found());
        assert!(status.get(&pending.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_resubmit_failed_job_creates_new_job() {
        let (queue, status, repo) = setup().await;
        let job = repo.create(NewJob::new("u", "class A(Scene): pass")).await.unwrap();
        queue.enqueue(&job.id).await.unwrap();
        queue.dequeue().await.unwrap();
        status.mark_processing(&job.id).await.unwrap();
        status.fail(&job.id, "boom").await.unwrap();

        let retry = queue.resubmit(&job.id).await.unwrap();

        assert_ne!(retry.id, job.id);
        assert_eq!(retry.status, JobStatus::Queued);
        assert_eq!(retry.owner_id, job.owner_id);
        assert_eq!(retry.script, "class A(Scene): pass");
        assert!(queue.contains(&retry.id).await.unwrap());

        let old = status.get(&job.id).await.unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert_eq!(old.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_resubmit_rejects_non_failed_job() {
        let (queue, _, repo) = setup().await;
        let job = repo.create(NewJob::new("u", "s")).await.unwrap();
        let err = queue.resubmit(&job.id).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidTransition(_)));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_entry_popped_during_enqueue_is_already_queued() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let status = Arc::new(StatusStore::new(repo.clone(), 4000));
        let backend = SlowPush {
            inner: MemoryQueue::new(),
            delay: Duration::from_millis(200),
        };
        let queue = Arc::new(JobQueue::new(Arc::new(backend), Arc::clone(&status)));
        let job = repo.create(NewJob::new("u", "s")).await.unwrap();

        let enqueue = {
            let queue = Arc::clone(&queue);
            let id = job.id.clone();
            tokio::spawn(async move { queue.enqueue(&id).await })
        };
        while !queue.contains(&job.id).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let popped = queue.dequeue().await.unwrap();
        assert_eq!(status.get(&popped).await.unwrap().status, JobStatus::Queued);
        status.mark_processing(&popped).await.unwrap();
        enqueue.await.unwrap().unwrap();

        assert_eq!(status.get(&job.id).await.unwrap().status, JobStatus::Processing);
        assert!(!queue.contains(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_push_reverts_to_pending() {
        let (queue, status, repo) = setup().await;
        let job = repo.create(NewJob::new("u", "s")).await.unwrap();
        queue.backend().push(&job.id, 1).await.unwrap();

        let err = queue.enqueue(&job.id).await.unwrap_err();

        assert!(err.is_already_queued());
        assert_eq!(status.get(&job.id).await.unwrap().status, JobStatus::Pending);
    }
}
