//! Render worker for the animq pipeline.
//!
//! This crate provides:
//! - The job queue service and the job status state machine
//! - A render executor bounded by a single global token pool
//! - A restartable worker pool
//! - Retention cleanup and startup recovery

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod pool;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod status;

pub use cleanup::{CleanupReport, CleanupScheduler};
pub use config::{CleanupConfig, WorkerConfig};
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::RenderExecutor;
pub use limiter::{RenderLimiter, RenderPermit};
pub use logging::JobLogger;
pub use persistence::{InMemoryJobRepository, JobRepository};
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use recovery::{recover_interrupted, RecoveryReport};
pub use retry::{BoundedRetry, NoRetry, RetryPolicy};
pub use status::StatusStore;
