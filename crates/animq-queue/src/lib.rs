//! Score-ordered render queue.
//!
//! This crate provides:
//! - The [`QueueBackend`] contract (insert-if-absent, atomic pop-min, remove)
//! - A Redis sorted-set backend shared safely between worker processes
//! - An in-process backend for single-node deployments and tests

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{connect, QueueBackend, QueueBackendKind, QueueConfig, QueueSnapshot};
pub use redis_queue::RedisQueue;
