//! Job persistence contract.
//!
//! The worker never owns the job store; it talks to it through
//! [`JobRepository`]. [`InMemoryJobRepository`] backs tests and the
//! standalone binary.

use std::collections::HashMap;

use animq_models::{Job, JobId, JobStatus, JobUpdate, NewJob, OwnerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a new `Pending` job and return it with its assigned id.
    async fn create(&self, new_job: NewJob) -> WorkerResult<Job>;

    /// `NotFound` if no job has this id.
    async fn get(&self, id: &JobId) -> WorkerResult<Job>;

    /// Apply a partial update and return the stored result.
    async fn update_fields(&self, id: &JobId, update: &JobUpdate) -> WorkerResult<Job>;

    /// `NotFound` if no job has this id.
    async fn delete(&self, id: &JobId) -> WorkerResult<()>;

    /// One page of an owner's jobs, newest first, plus the owner's total.
    /// Pages start at 1.
    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        page: usize,
        page_size: usize,
    ) -> WorkerResult<(Vec<Job>, usize)>;

    async fn list_by_status(&self, statuses: &[JobStatus]) -> WorkerResult<Vec<Job>>;

    /// Jobs created strictly before `cutoff`, oldest first.
    async fn list_created_before(&self, cutoff: DateTime<Utc>) -> WorkerResult<Vec<Job>>;
}

/// Job store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed job, replacing any job with the same id.
    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, new_job: NewJob) -> WorkerResult<Job> {
        let job = Job::new(JobId::new(), new_job);
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> WorkerResult<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkerError::NotFound(id.clone()))
    }

    async fn update_fields(&self, id: &JobId, update: &JobUpdate) -> WorkerResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| WorkerError::NotFound(id.clone()))?;
        job.apply(update);
        Ok(job.clone())
    }

    async fn delete(&self, id: &JobId) -> WorkerResult<()> {
        self.jobs
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| WorkerError::NotFound(id.clone()))
    }

    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        page: usize,
        page_size: usize,
    ) -> WorkerResult<(Vec<Job>, usize)> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|j| &j.owner_id == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = owned.len();
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
        let items = owned.into_iter().skip(offset).take(page_size).collect();
        Ok((items, total))
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> WorkerResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn list_created_before(&self, cutoff: DateTime<Utc>) -> WorkerResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut old: Vec<Job> = jobs
            .values()
            .filter(|j| j.created_at < cutoff)
            .cloned()
            .collect();
        old.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_create_get_delete() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create(NewJob::new("u1", "class A(Scene): pass")).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(repo.get(&job.id).await.unwrap(), job);

        repo.delete(&job.id).await.unwrap();
        assert!(repo.get(&job.id).await.unwrap_err().is_not_found());
        assert!(repo.delete(&job.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_by_owner_pages_newest_first() {
        let repo = InMemoryJobRepository::new();
        let base = Utc::now();
        for i in 0..5 {
            let mut job = Job::new(JobId::from(format!("job-{i}")), NewJob::new("owner", "s"));
            job.created_at = base + Duration::seconds(i);
            repo.insert(job).await;
        }
        repo.create(NewJob::new("someone-else", "s")).await.unwrap();

        let (first, total) = repo.list_by_owner(&OwnerId::new("owner"), 1, 2).await.unwrap();
        assert_eq!(total, 5);
        let ids: Vec<&str> = first.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["job-4", "job-3"]);

        let (last, _) = repo.list_by_owner(&OwnerId::new("owner"), 3, 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id.as_str(), "job-0");
    }

    #[tokio::test]
    async fn test_list_created_before_and_by_status() {
        let repo = InMemoryJobRepository::new();
        let mut old = Job::new(JobId::from("old"), NewJob::new("u", "s"));
        old.created_at = Utc::now() - Duration::days(40);
        old.status = JobStatus::Queued;
        repo.insert(old).await;
        repo.create(NewJob::new("u", "s")).await.unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        let stale = repo.list_created_before(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id.as_str(), "old");

        let queued = repo.list_by_status(&[JobStatus::Queued]).await.unwrap();
        assert_eq!(queued.len(), 1);
        let both = repo
            .list_by_status(&[JobStatus::Queued, JobStatus::Pending])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }
}
