//! Worker error types.

use animq_media::MediaError;
use animq_models::{InvalidTransition, JobId};
use animq_queue::QueueError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Appended to job error messages cut at the size limit.
pub const TRUNCATION_TAG: &str = "…[truncated]";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Missing {0} for status change")]
    MissingField(&'static str),

    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO failure: {0}")]
    IoFailure(String),

    #[error("Worker pool is already running")]
    AlreadyRunning,

    #[error("Render cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn render_failed(msg: impl Into<String>) -> Self {
        Self::RenderFailed(msg.into())
    }

    pub fn io_failure(msg: impl Into<String>) -> Self {
        Self::IoFailure(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::NotFound(_))
    }

    pub fn is_queue_empty(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_queue_empty())
    }

    pub fn is_not_queued(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_not_queued())
    }

    pub fn is_already_queued(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_already_queued())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }

    /// Render-time errors: the job has been recorded as Failed.
    pub fn is_terminal_for_job(&self) -> bool {
        matches!(
            self,
            WorkerError::RenderFailed(_)
                | WorkerError::Timeout(_)
                | WorkerError::IoFailure(_)
                | WorkerError::Cancelled
                | WorkerError::Io(_)
        )
    }

    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::RenderFailed(_) | WorkerError::Timeout(_) | WorkerError::IoFailure(_)
        )
    }

    /// Label used for the failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkerError::RenderFailed(_) => "render_failed",
            WorkerError::Timeout(_) => "timeout",
            WorkerError::IoFailure(_) | WorkerError::Io(_) => "io_failure",
            WorkerError::Cancelled => "cancelled",
            WorkerError::NotFound(_) => "not_found",
            WorkerError::InvalidTransition(_) | WorkerError::MissingField(_) => "invalid_transition",
            WorkerError::AlreadyRunning | WorkerError::ConfigError(_) => "internal",
            WorkerError::Queue(_) => "queue",
        }
    }
}

/// Renderer errors mapped onto the job failure taxonomy.
impl From<MediaError> for WorkerError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Cancelled => WorkerError::Cancelled,
            MediaError::Timeout(limit) => {
                WorkerError::RenderFailed(format!("renderer timed out after {limit:?}"))
            }
            MediaError::ArtifactNotFound(_) => WorkerError::Timeout("generation timeout".to_string()),
            MediaError::RendererNotFound(program) => {
                WorkerError::RenderFailed(format!("renderer not found: {program}"))
            }
            MediaError::RenderFailed { message, output, .. } => match output {
                Some(output) => WorkerError::RenderFailed(format!("{message}\n{output}")),
                None => WorkerError::RenderFailed(message),
            },
            MediaError::FileNotFound(path) => {
                WorkerError::IoFailure(format!("file not found: {}", path.display()))
            }
            MediaError::Io(e) => WorkerError::IoFailure(e.to_string()),
        }
    }
}

/// Cut `message` to at most `max_bytes`, on a char boundary, tagging the cut.
pub fn truncate_message(message: &str, max_bytes: usize) -> String {
    if message.len() <= max_bytes {
        return message.to_string();
    }
    let budget = max_bytes.saturating_sub(TRUNCATION_TAG.len());
    let mut end = budget.min(message.len());
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &message[..end], TRUNCATION_TAG)
}
