//! Retention sweep for old jobs, artifacts and scratch directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use animq_models::{Job, JobStatus};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CleanupConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::queue::JobQueue;
use crate::status::StatusStore;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub jobs_deleted: u64,
    pub artifacts_deleted: u64,
    pub orphans_deleted: u64,
    pub scratch_deleted: u64,
    /// Artifacts kept because a surviving job still points at the same file
    pub artifacts_shared: u64,
    /// Old jobs left alone because a worker is rendering them
    pub skipped_in_flight: u64,
    /// Per-item failures that were logged and skipped
    pub errors: u64,
}

impl CleanupReport {
    /// Jobs, artifacts, orphans and scratch directories removed.
    pub fn total_deleted(&self) -> u64 {
        self.jobs_deleted + self.artifacts_deleted + self.orphans_deleted + self.scratch_deleted
    }
}

/// Deletes jobs and files past their retention age.
pub struct CleanupScheduler {
    status: Arc<StatusStore>,
    queue: Arc<JobQueue>,
    config: CleanupConfig,
    output_dir: PathBuf,
    work_dir: PathBuf,
    extension: String,
}

impl CleanupScheduler {
    /// Create a scheduler sweeping `output_dir` for artifacts with
    /// `extension` and `work_dir` for scratch directories.
    pub fn new(
        status: Arc<StatusStore>,
        queue: Arc<JobQueue>,
        config: CleanupConfig,
        output_dir: PathBuf,
        work_dir: PathBuf,
        extension: String,
    ) -> Self {
        Self {
            status,
            queue,
            config,
            output_dir,
            work_dir,
            extension,
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Sweep everything older than `max_age_days`.
    pub async fn run_once(
        &self,
        cancel: &CancellationToken,
        max_age_days: u32,
    ) -> WorkerResult<CleanupReport> {
        self.run_once_at(cancel, max_age_days, Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn run_once_at(
        &self,
        cancel: &CancellationToken,
        max_age_days: u32,
        now: DateTime<Utc>,
    ) -> WorkerResult<CleanupReport> {
        let cutoff = now - chrono::Duration::days(i64::from(max_age_days));
        info!("Starting cleanup of jobs created before {}", cutoff);

        let mut report = CleanupReport::default();

        let jobs = self.status.repository().list_created_before(cutoff).await?;
        let mut artifact_refs = self.artifact_refs().await?;
        for job in jobs {
            if cancel.is_cancelled() {
                info!("Cleanup cancelled");
                return Ok(report);
            }
            self.delete_job(&job, &mut artifact_refs, &mut report).await;
        }

        self.sweep_orphans(to_system_time(cutoff), &mut report).await;

        if let Some(days) = self.config.scratch_retention_days {
            let scratch_cutoff = now - chrono::Duration::days(i64::from(days));
            self.sweep_scratch(to_system_time(scratch_cutoff), &mut report)
                .await;
        }

        metrics::record_cleanup_deleted("job", report.jobs_deleted);
        metrics::record_cleanup_deleted("artifact", report.artifacts_deleted);
        metrics::record_cleanup_deleted("orphan", report.orphans_deleted);
        metrics::record_cleanup_deleted("scratch", report.scratch_deleted);

        info!(
            jobs = report.jobs_deleted,
            artifacts = report.artifacts_deleted,
            orphans = report.orphans_deleted,
            scratch = report.scratch_deleted,
            shared = report.artifacts_shared,
            skipped = report.skipped_in_flight,
            errors = report.errors,
            "Cleanup finished"
        );
        Ok(report)
    }

    /// How many `Completed` jobs point at each artifact path.
    ///
    /// Renders of the same scene by one owner land on the same file, so a
    /// file may only go once no remaining job references it.
    async fn artifact_refs(&self) -> WorkerResult<HashMap<PathBuf, usize>> {
        let completed = self
            .status
            .repository()
            .list_by_status(&[JobStatus::Completed])
            .await?;
        let mut refs = HashMap::new();
        for path in completed.into_iter().filter_map(|job| job.artifact_path) {
            *refs.entry(path).or_insert(0) += 1;
        }
        Ok(refs)
    }

    async fn delete_job(
        &self,
        job: &Job,
        artifact_refs: &mut HashMap<PathBuf, usize>,
        report: &mut CleanupReport,
    ) {
        if job.status == JobStatus::Processing {
            debug!(job_id = %job.id, "Skipping job still being rendered");
            report.skipped_in_flight += 1;
            return;
        }

        if let Err(e) = self.queue.remove(&job.id).await {
            if !e.is_not_queued() {
                warn!(job_id = %job.id, "Failed to remove job from queue: {}", e);
            }
        }

        if let Some(path) = &job.artifact_path {
            let remaining = artifact_refs.get_mut(path).map_or(0, |refs| {
                *refs = refs.saturating_sub(1);
                *refs
            });
            if remaining > 0 {
                debug!(job_id = %job.id, "Keeping {} for {} other job(s)", path.display(), remaining);
                report.artifacts_shared += 1;
            } else {
                match remove_file_if_present(path).await {
                    Ok(true) => report.artifacts_deleted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(job_id = %job.id, "Failed to delete {}: {}", path.display(), e);
                        report.errors += 1;
                    }
                }
            }
        }

        match self.status.delete(&job.id).await {
            Ok(()) => report.jobs_deleted += 1,
            // Deleted concurrently; nothing left to do.
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(job_id = %job.id, "Failed to delete job record: {}", e);
                report.errors += 1;
            }
        }
    }

    /// Artifacts under `<output_dir>/<owner>/` whose mtime is before `cutoff`.
    async fn sweep_orphans(&self, cutoff: SystemTime, report: &mut CleanupReport) {
        let owners = match list_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping artifact sweep of {}: {}", self.output_dir.display(), e);
                return;
            }
        };

        for owner_dir in owners.into_iter().filter(|p| p.is_dir()) {
            let files = match list_dir(&owner_dir).await {
                Ok(files) => files,
                Err(e) => {
                    warn!("Failed to list {}: {}", owner_dir.display(), e);
                    report.errors += 1;
                    continue;
                }
            };
            for file in files {
                if !self.has_extension(&file) || !modified_before(&file, cutoff).await {
                    continue;
                }
                match tokio::fs::remove_file(&file).await {
                    Ok(()) => {
                        debug!("Deleted old artifact {}", file.display());
                        report.orphans_deleted += 1;
                    }
                    Err(e) => {
                        error!("Failed to delete {}: {}", file.display(), e);
                        report.errors += 1;
                    }
                }
            }
        }
    }

    /// Per-render scratch directories whose mtime is before `cutoff`.
    async fn sweep_scratch(&self, cutoff: SystemTime, report: &mut CleanupReport) {
        let entries = match list_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping scratch sweep of {}: {}", self.work_dir.display(), e);
                return;
            }
        };

        for dir in entries.into_iter().filter(|p| p.is_dir()) {
            if !modified_before(&dir, cutoff).await {
                continue;
            }
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => report.scratch_deleted += 1,
                Err(e) => {
                    error!("Failed to delete scratch dir {}: {}", dir.display(), e);
                    report.errors += 1;
                }
            }
        }
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(&self.extension))
    }

    /// One sweep now, then one per `interval` until `cancel` fires.
    pub fn start_periodic(
        self: Arc<Self>,
        cancel: CancellationToken,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Cleanup scheduler started (every {:?})", interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(&cancel, self.config.max_age_days).await {
                            error!("Cleanup sweep failed: {}", e);
                        }
                    }
                }
            }
            info!("Cleanup scheduler stopped");
        })
    }
}

fn to_system_time(at: DateTime<Utc>) -> SystemTime {
    let millis = at.timestamp_millis();
    if millis >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis.unsigned_abs())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

async fn list_dir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

async fn modified_before(path: &Path, cutoff: SystemTime) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified < cutoff,
        Err(_) => false,
    }
}

async fn remove_file_if_present(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryJobRepository;
    use animq_models::{JobId, NewJob};
    use animq_queue::MemoryQueue;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        output: PathBuf,
        work: PathBuf,
        repo: Arc<InMemoryJobRepository>,
        queue: Arc<JobQueue>,
        scheduler: Arc<CleanupScheduler>,
    }

    fn fixture(scratch_retention_days: Option<u32>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("videos");
        let work = dir.path().join("temp");
        let repo = Arc::new(InMemoryJobRepository::new());
        let status = Arc::new(StatusStore::new(repo.clone(), 4000));
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryQueue::new()), Arc::clone(&status)));
        let config = CleanupConfig {
            scratch_retention_days,
            ..Default::default()
        };
        let scheduler = Arc::new(CleanupScheduler::new(
            status,
            Arc::clone(&queue),
            config,
            output.clone(),
            work.clone(),
            "mp4".to_string(),
        ));
        Fixture {
            _dir: dir,
            output,
            work,
            repo,
            queue,
            scheduler,
        }
    }

    async fn old_job(fx: &Fixture, id: &str, status: JobStatus, days_old: i64) -> Job {
        let mut job = Job::new(JobId::from(id), NewJob::new("owner", "s"));
        job.created_at = Utc::now() - chrono::Duration::days(days_old);
        job.status = status;
        if status == JobStatus::Completed {
            let path = fx.output.join("owner").join(format!("{id}.mp4"));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"video").unwrap();
            job.artifact_path = Some(path);
        }
        if status == JobStatus::Failed {
            job.error_message = Some("boom".to_string());
        }
        fx.repo.insert(job.clone()).await;
        job
    }

    #[tokio::test]
    async fn test_old_jobs_and_artifacts_removed() {
        let fx = fixture(None);
        let done = old_job(&fx, "done", JobStatus::Completed, 40).await;
        old_job(&fx, "failed", JobStatus::Failed, 40).await;
        let fresh = old_job(&fx, "fresh", JobStatus::Completed, 1).await;

        let report = fx
            .scheduler
            .run_once(&CancellationToken::new(), 30)
            .await
            .unwrap();

        assert_eq!(report.jobs_deleted, 2);
        assert_eq!(report.artifacts_deleted, 1);
        assert!(!done.artifact_path.unwrap().exists());
        assert!(fresh.artifact_path.unwrap().exists());
        assert_eq!(fx.repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_artifact_shared_with_newer_job_is_kept() {
        let fx = fixture(None);
        let shared = fx.output.join("owner").join("Demo.mp4");
        let mut old = old_job(&fx, "old", JobStatus::Completed, 32).await;
        let mut new = old_job(&fx, "new", JobStatus::Completed, 0).await;
        std::fs::write(&shared, b"newer render").unwrap();
        for job in [&mut old, &mut new] {
            job.artifact_path = Some(shared.clone());
            fx.repo.insert(job.clone()).await;
        }
        let cancel = CancellationToken::new();

        let report = fx.scheduler.run_once(&cancel, 30).await.unwrap();
        assert_eq!(report.jobs_deleted, 1);
        assert_eq!(report.artifacts_deleted, 0);
        assert_eq!(report.artifacts_shared, 1);
        assert_eq!(std::fs::read(&shared).unwrap(), b"newer render");

        let later = Utc::now() + chrono::Duration::days(31);
        let report = fx.scheduler.run_once_at(&cancel, 30, later).await.unwrap();
        assert_eq!(report.jobs_deleted, 1);
        assert_eq!(report.artifacts_deleted, 1);
        assert!(!shared.exists());
    }

    #[tokio::test]
    async fn test_old_queued_job_leaves_the_queue() {
        let fx = fixture(None);
        old_job(&fx, "waiting", JobStatus::Queued, 40).await;
        fx.queue.restore_entry(&JobId::from("waiting"), 1).await.unwrap();

        fx.scheduler
            .run_once(&CancellationToken::new(), 30)
            .await
            .unwrap();

        assert!(!fx.queue.contains(&JobId::from("waiting")).await.unwrap());
        assert!(fx.repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_in_flight_job_is_skipped() {
        let fx = fixture(None);
        old_job(&fx, "busy", JobStatus::Processing, 40).await;

        let report = fx
            .scheduler
            .run_once(&CancellationToken::new(), 30)
            .await
            .unwrap();
        assert_eq!(report.skipped_in_flight, 1);
        assert_eq!(fx.repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let fx = fixture(None);
        old_job(&fx, "done", JobStatus::Completed, 40).await;
        let cancel = CancellationToken::new();

        let first = fx.scheduler.run_once(&cancel, 30).await.unwrap();
        assert!(first.total_deleted() > 0);

        let second = fx.scheduler.run_once(&cancel, 30).await.unwrap();
        assert_eq!(second, CleanupReport::default());
    }

    #[tokio::test]
    async fn test_orphans_and_scratch_by_mtime() {
        let fx = fixture(Some(7));
        let orphan = fx.output.join("someone").join("Lost.mp4");
        std::fs::create_dir_all(orphan.parent().unwrap()).unwrap();
        std::fs::write(&orphan, b"video").unwrap();
        let note = fx.output.join("someone").join("notes.txt");
        std::fs::write(&note, b"keep").unwrap();
        let scratch = fx.work.join("0b7c1f4e");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("animation.py"), b"s").unwrap();

        let cancel = CancellationToken::new();
        let today = fx.scheduler.run_once(&cancel, 30).await.unwrap();
        assert_eq!(today.orphans_deleted, 0);
        assert_eq!(today.scratch_deleted, 0);

        let later = Utc::now() + chrono::Duration::days(31);
        let report = fx.scheduler.run_once_at(&cancel, 30, later).await.unwrap();
        assert_eq!(report.orphans_deleted, 1);
        assert_eq!(report.scratch_deleted, 1);
        assert!(!orphan.exists());
        assert!(note.exists());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_cancelled_sweep_stops_early() {
        let fx = fixture(None);
        old_job(&fx, "a", JobStatus::Failed, 40).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = fx.scheduler.run_once(&cancel, 30).await.unwrap();
        assert_eq!(report.jobs_deleted, 0);
        assert_eq!(fx.repo.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_immediately_and_on_interval() {
        let fx = fixture(None);
        old_job(&fx, "first", JobStatus::Failed, 40).await;
        let cancel = CancellationToken::new();

        let handle = Arc::clone(&fx.scheduler).start_periodic(cancel.clone(), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fx.repo.is_empty().await);

        old_job(&fx, "second", JobStatus::Failed, 40).await;
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(fx.repo.is_empty().await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
