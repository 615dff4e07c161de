//! Render executor: one job from script to stored artifact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use animq_media::{
    artifact_destination, move_file, ArtifactLocator, ExitClassification, LocateContext,
    RendererCommand, RendererRunner,
};
use animq_models::{Job, JobId};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::limiter::{RenderLimiter, RenderPermit};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::status::StatusStore;

/// Message recorded for renders stopped through their cancellation token.
pub const CANCELLED_MESSAGE: &str = "render cancelled";

/// Result of one successful attempt.
struct Rendered {
    artifact: PathBuf,
    classification: ExitClassification,
}

/// Runs the renderer for a job and records the outcome.
pub struct RenderExecutor {
    config: Arc<WorkerConfig>,
    status: Arc<StatusStore>,
    limiter: RenderLimiter,
    locator: Arc<ArtifactLocator>,
    retry: Arc<dyn RetryPolicy>,
}

impl RenderExecutor {
    /// Build an executor with the default locator and the configured
    /// retry policy.
    pub fn new(
        config: Arc<WorkerConfig>,
        status: Arc<StatusStore>,
        limiter: RenderLimiter,
    ) -> Self {
        let locator = Arc::new(ArtifactLocator::new(config.locator_config()));
        let retry = config.retry_policy();
        Self {
            config,
            status,
            limiter,
            locator,
            retry,
        }
    }

    /// Use a custom locator, e.g. with a different strategy chain.
    pub fn with_locator(mut self, locator: ArtifactLocator) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    /// Replace the retry policy derived from the config.
    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// The token pool gating every render.
    pub fn limiter(&self) -> &RenderLimiter {
        &self.limiter
    }

    /// Render `script` for a dequeued, `Queued` job.
    ///
    /// Blocks for a render token first. If `cancel` fires while waiting the
    /// job is failed as cancelled, since it has already left the queue.
    /// See [`RenderExecutor::render_with_permit`] for the rest.
    pub async fn render(
        &self,
        cancel: &CancellationToken,
        job_id: &JobId,
        script: &str,
    ) -> WorkerResult<PathBuf> {
        let permit = match self.limiter.acquire(cancel).await {
            Ok(permit) => permit,
            Err(e) if e.is_cancelled() => {
                self.status.mark_processing(job_id).await?;
                self.status.fail(job_id, CANCELLED_MESSAGE).await?;
                metrics::record_job_failed(e.reason());
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.render_with_permit(permit, cancel, job_id, script).await
    }

    /// Render `script` for a dequeued, `Queued` job using a token the caller
    /// already holds.
    ///
    /// Moves the job to `Processing`, runs the renderer and records the
    /// outcome. Render-time failures are recorded on the job as `Failed`
    /// before being returned. Cancelling `cancel` kills the renderer and
    /// fails the job as cancelled. The token is released on return.
    pub async fn render_with_permit(
        &self,
        permit: RenderPermit,
        cancel: &CancellationToken,
        job_id: &JobId,
        script: &str,
    ) -> WorkerResult<PathBuf> {
        let _permit = permit;
        let job = self.status.mark_processing(job_id).await?;
        let _in_flight = metrics::track_render();
        let logger = JobLogger::new(job_id, &job.owner_id, "render");

        self.render_job(cancel, &job, script, &logger)
            .instrument(logger.create_span())
            .await
    }

    async fn render_job(
        &self,
        cancel: &CancellationToken,
        job: &Job,
        script: &str,
        logger: &JobLogger,
    ) -> WorkerResult<PathBuf> {
        let started = Instant::now();
        let mut attempt = 1u32;

        let outcome = loop {
            logger.log_start(attempt, "rendering script");
            match self.attempt(cancel, job, script, logger).await {
                Ok(rendered) => break Ok(rendered),
                Err(e) => match self.retry.next_delay(attempt, &e) {
                    Some(delay) if !cancel.is_cancelled() => {
                        logger.log_warning(&format!(
                            "attempt {attempt} failed, retrying in {delay:?}: {e}"
                        ));
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => break Err(WorkerError::Cancelled),
                        }
                        attempt += 1;
                    }
                    _ => break Err(e),
                },
            }
        };
        metrics::record_render_duration(started.elapsed().as_secs_f64());

        match outcome {
            Ok(rendered) => {
                self.status.complete(&job.id, rendered.artifact.clone()).await?;
                metrics::record_job_completed(rendered.classification.as_str());
                logger.log_completion(&format!("artifact at {}", rendered.artifact.display()));
                Ok(rendered.artifact)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                let message = match &e {
                    WorkerError::Timeout(m) | WorkerError::RenderFailed(m) => m.clone(),
                    WorkerError::Cancelled => CANCELLED_MESSAGE.to_string(),
                    other => other.to_string(),
                };
                if let Err(store_err) = self.status.fail(&job.id, message).await {
                    logger.log_error(&format!("could not record failure: {store_err}"));
                }
                metrics::record_job_failed(e.reason());
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        job: &Job,
        script: &str,
        logger: &JobLogger,
    ) -> WorkerResult<Rendered> {
        let work_dir = self.prepare_work_dir(script).await?;
        let script_path = work_dir.join(&self.config.script_file_name);
        let media_dir = work_dir.join("media");

        let command = RendererCommand::new(&self.config.renderer_program, &script_path)
            .base_args(self.config.renderer_args.iter().cloned())
            .quality(self.config.quality)
            .media_dir(&media_dir)
            .working_dir(&work_dir)
            .envs(self.config.renderer_env.iter().cloned());

        let runner = RendererRunner::new()
            .with_cancel(cancel.clone())
            .with_timeout(self.config.renderer_timeout);

        let output = runner.run(&command).await?;
        let classification = runner.classify(&output);
        match classification {
            ExitClassification::Success => {}
            ExitClassification::SoftSuccess { exit_code } => logger.log_warning(&format!(
                "renderer exited with {exit_code:?} but reported completion"
            )),
            ExitClassification::Failure { exit_code } => {
                return Err(WorkerError::render_failed(format!(
                    "renderer exited with {}\n{}",
                    exit_code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")),
                    output.output
                )));
            }
        }
        logger.log_progress(&format!(
            "renderer finished in {:.1}s, locating artifact",
            output.elapsed.as_secs_f64()
        ));

        let ctx = LocateContext {
            work_dir: work_dir.clone(),
            media_dir,
            script_path,
            script: script.to_string(),
            render_output: output.output,
            extension: self.config.artifact_extension.clone(),
            resolutions: self.config.resolutions(),
        };
        let located = self.locator.locate(ctx, Some(cancel)).await?;

        let artifact = self.store_artifact(&located, job).await?;
        Ok(Rendered {
            artifact,
            classification,
        })
    }

    /// Fresh `<work_dir>/<uuid>/` holding the script. Kept after the render.
    async fn prepare_work_dir(&self, script: &str) -> WorkerResult<PathBuf> {
        let dir = absolute(&self.config.work_dir)?.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkerError::io_failure(format!("create {}: {e}", dir.display())))?;

        let script_path = dir.join(&self.config.script_file_name);
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|e| WorkerError::io_failure(format!("write {}: {e}", script_path.display())))?;
        Ok(dir)
    }

    async fn store_artifact(&self, located: &Path, job: &Job) -> WorkerResult<PathBuf> {
        let file_name = located
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                WorkerError::io_failure(format!("artifact has no file name: {}", located.display()))
            })?;
        let dest = artifact_destination(&self.config.output_dir, job.owner_id.as_str(), &file_name);
        move_file(located, &dest).await?;
        Ok(dest)
    }
}

fn absolute(path: &Path) -> WorkerResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
