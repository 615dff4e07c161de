//! Structured job logging.
//!
//! Every render logs through a [`JobLogger`] so that each event carries the
//! same job, owner and operation fields, and the whole render runs inside
//! one `job` span.

use animq_models::{JobId, OwnerId};
use tracing::{error, info, warn, Span};

/// Per-job logger with fixed contextual fields.
///
/// Cheap to clone; holds owned copies of the ids so it can outlive the
/// job record it was built from.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    owner_id: String,
    operation: &'static str,
}

impl JobLogger {
    /// Create a logger for one job.
    ///
    /// # Arguments
    /// * `job_id` - The job being worked on
    /// * `owner_id` - Owner of the job, attached to lifecycle events
    /// * `operation` - Short name of the work, e.g. `"render"`
    pub fn new(job_id: &JobId, owner_id: &OwnerId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            owner_id: owner_id.to_string(),
            operation,
        }
    }

    /// Log the start of an attempt. `attempt` counts from 1.
    pub fn log_start(&self, attempt: u32, message: &str) {
        info!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            operation = self.operation,
            attempt,
            "Job started: {}", message
        );
    }

    /// Log an intermediate step.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job progress: {}", message
        );
    }

    /// Log a recoverable problem, e.g. a soft-success exit or a retry.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    /// Log a failure that ends the job.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            operation = self.operation,
            "Job error: {}", message
        );
    }

    /// Log successful completion.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            operation = self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span wrapping all work on this job.
    ///
    /// The executor instruments the whole render with it, so renderer and
    /// locator events logged without a `JobLogger` still carry the job id.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            operation = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let logger = JobLogger::new(&JobId::from("job-1"), &OwnerId::new("u"), "render");
        assert_eq!(logger.job_id(), "job-1");
        assert_eq!(logger.owner_id(), "u");
        assert_eq!(logger.operation(), "render");
    }

    #[test]
    fn test_span_is_named_job() {
        let logger = JobLogger::new(&JobId::from("job-2"), &OwnerId::new("u"), "render");
        let span = logger.create_span();
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "job");
        }
    }
}
