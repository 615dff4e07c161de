//! Error types for renderer operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for renderer operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running the renderer or collecting its output.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Renderer not found: {0}")]
    RendererNotFound(String),

    #[error("Render failed: {message}")]
    RenderFailed {
        message: String,
        output: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Render cancelled")]
    Cancelled,

    #[error("Renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("No stable artifact found after {0:?}")]
    ArtifactNotFound(Duration),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create a render failure error.
    pub fn render_failed(
        message: impl Into<String>,
        output: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::RenderFailed {
            message: message.into(),
            output,
            exit_code,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }
}
