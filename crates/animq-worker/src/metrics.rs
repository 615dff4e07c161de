//! Prometheus metrics for the render pipeline.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const QUEUE_LENGTH: &str = "animq_queue_length";
    pub const JOBS_ENQUEUED_TOTAL: &str = "animq_jobs_enqueued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "animq_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "animq_jobs_failed_total";

    // Render metrics
    pub const RENDER_DURATION_SECONDS: &str = "animq_render_duration_seconds";
    pub const RENDERS_IN_FLIGHT: &str = "animq_renders_in_flight";

    // Retention metrics
    pub const CLEANUP_DELETED_TOTAL: &str = "animq_cleanup_deleted_total";
}

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Current number of queue entries.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record a successful enqueue.
pub fn record_job_enqueued() {
    counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
}

/// `outcome` is `success` or `soft_success`.
pub fn record_job_completed(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

/// `reason` comes from [`crate::error::WorkerError::reason`] or names a
/// pool-level failure (`panic`, `interrupted`).
pub fn record_job_failed(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Wall time of a render, all attempts included.
pub fn record_render_duration(duration_secs: f64) {
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}

/// Keeps one render counted in `animq_renders_in_flight` until dropped.
#[must_use]
pub struct InFlightRender(());

impl Drop for InFlightRender {
    fn drop(&mut self) {
        gauge!(names::RENDERS_IN_FLIGHT).decrement(1.0);
    }
}

/// Count a render as in flight for the lifetime of the returned guard.
pub fn track_render() -> InFlightRender {
    gauge!(names::RENDERS_IN_FLIGHT).increment(1.0);
    InFlightRender(())
}

/// `kind` is one of `job`, `artifact`, `orphan`, `scratch`.
pub fn record_cleanup_deleted(kind: &str, count: u64) {
    if count == 0 {
        return;
    }
    let labels = [("kind", kind.to_string())];
    counter!(names::CLEANUP_DELETED_TOTAL, &labels).increment(count);
}
