//! Shared data models for the animq render pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Render jobs and their identifiers
//! - The job status state machine
//! - Renderer quality presets

pub mod job;
pub mod job_status;
pub mod quality;

// Re-export common types
pub use job::{FieldPatch, Job, JobId, JobUpdate, NewJob, OwnerId};
pub use job_status::{InvalidTransition, JobStatus};
pub use quality::{ParseQualityError, RenderQuality};
