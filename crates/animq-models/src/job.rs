//! Render job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::JobStatus;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the user owning a job. Also names the artifact folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A render job.
///
/// `artifact_path` is set only while the job is `Completed` and
/// `error_message` only while it is `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Owning user
    pub owner_id: OwnerId,

    /// Script text handed to the renderer
    pub script: String,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Final artifact location (Completed only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,

    /// Failure description (Failed only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh `Pending` job.
    pub fn new(id: JobId, new_job: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: new_job.owner_id,
            script: new_job.script,
            status: JobStatus::Pending,
            artifact_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the artifact/error fields agree with the status.
    pub fn is_consistent(&self) -> bool {
        let artifact_ok = self.artifact_path.is_some() == (self.status == JobStatus::Completed);
        let error_ok = self.error_message.is_some() == (self.status == JobStatus::Failed);
        artifact_ok && error_ok
    }

    /// Apply a partial update and bump `updated_at`.
    pub fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        update.artifact_path.apply_to(&mut self.artifact_path);
        update.error_message.apply_to(&mut self.error_message);
        self.updated_at = Utc::now();
    }
}

/// Input for creating a job; supplied by the script source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub owner_id: OwnerId,
    pub script: String,
}

impl NewJob {
    /// A job for `owner_id` rendering `script`.
    pub fn new(owner_id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            owner_id: OwnerId::new(owner_id),
            script: script.into(),
        }
    }
}

/// Change to a single optional field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldPatch<T> {
    /// Leave the stored value as is
    #[default]
    Keep,
    /// Replace the stored value
    Set(T),
    /// Reset the stored value to `None`
    Clear,
}

impl<T: Clone> FieldPatch<T> {
    fn apply_to(&self, field: &mut Option<T>) {
        match self {
            FieldPatch::Keep => {}
            FieldPatch::Set(v) => *field = Some(v.clone()),
            FieldPatch::Clear => *field = None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, FieldPatch::Keep)
    }
}

/// Partial update of a job record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub artifact_path: FieldPatch<PathBuf>,
    pub error_message: FieldPatch<String>,
}

impl JobUpdate {
    /// Update that only changes the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = FieldPatch::Set(path.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = FieldPatch::Set(message.into());
        self
    }

    /// Whether applying the update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.artifact_path.is_keep() && self.error_message.is_keep()
    }
}
