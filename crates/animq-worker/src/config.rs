//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use animq_media::{LocatorConfig, StabilityCheck};
use animq_models::RenderQuality;

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{BoundedRetry, NoRetry, RetryPolicy};

/// Resolution folders the renderer may write into, besides the configured one.
const KNOWN_RESOLUTIONS: [&str; 5] = ["720p30", "1080p60", "480p15", "1440p60", "2160p60"];

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `K=V,K=V`. A bare `K=` sets an empty value.
pub fn parse_env_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent renders. Sets both the worker count and the
    /// render token pool.
    pub max_concurrent_renders: usize,
    /// Sleep after finding the queue empty
    pub poll_backoff: Duration,
    /// Root for per-render scratch directories
    pub work_dir: PathBuf,
    /// Root for final artifacts, one folder per owner
    pub output_dir: PathBuf,
    /// Renderer executable
    pub renderer_program: String,
    /// Arguments before the quality flag
    pub renderer_args: Vec<String>,
    pub quality: RenderQuality,
    /// Hard limit on a single renderer run
    pub renderer_timeout: Duration,
    /// Extra environment for the renderer
    pub renderer_env: Vec<(String, String)>,
    /// File name the script is written to inside the scratch directory
    pub script_file_name: String,
    /// Artifact extension, without the dot
    pub artifact_extension: String,
    pub locate_max_wait: Duration,
    pub locate_poll_interval: Duration,
    pub stability_poll_interval: Duration,
    pub stability_required_polls: u32,
    /// Total render attempts per job; 1 disables retry
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each later one
    pub retry_backoff: Duration,
    /// Stored job error messages are cut to this many bytes
    pub error_message_max_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_renders: 2,
            poll_backoff: Duration::from_secs(5),
            work_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("videos"),
            renderer_program: "python3".to_string(),
            renderer_args: vec!["-m".to_string(), "manim".to_string(), "render".to_string()],
            quality: RenderQuality::Medium,
            renderer_timeout: Duration::from_secs(1800),
            renderer_env: vec![("PYTHONPATH".to_string(), String::new())],
            script_file_name: "animation.py".to_string(),
            artifact_extension: "mp4".to_string(),
            locate_max_wait: Duration::from_secs(30),
            locate_poll_interval: Duration::from_millis(500),
            stability_poll_interval: Duration::from_millis(200),
            stability_required_polls: 3,
            max_attempts: 1,
            retry_backoff: Duration::from_secs(10),
            error_message_max_bytes: 4000,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_renders: env_parse("RENDER_MAX_CONCURRENT", defaults.max_concurrent_renders),
            poll_backoff: Duration::from_millis(env_parse("WORKER_POLL_BACKOFF_MS", 5000)),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            renderer_program: std::env::var("RENDERER_PROGRAM")
                .unwrap_or(defaults.renderer_program),
            renderer_args: std::env::var("RENDERER_ARGS")
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or(defaults.renderer_args),
            quality: env_parse("RENDERER_QUALITY", defaults.quality),
            renderer_timeout: Duration::from_secs(env_parse("RENDERER_TIMEOUT_SECS", 1800)),
            renderer_env: std::env::var("RENDERER_ENV")
                .map(|s| parse_env_pairs(&s))
                .unwrap_or(defaults.renderer_env),
            script_file_name: std::env::var("SCRIPT_FILE_NAME")
                .unwrap_or(defaults.script_file_name),
            artifact_extension: std::env::var("ARTIFACT_EXTENSION")
                .map(|s| s.trim_start_matches('.').to_string())
                .unwrap_or(defaults.artifact_extension),
            locate_max_wait: Duration::from_secs(env_parse("LOCATE_MAX_WAIT_SECS", 30)),
            locate_poll_interval: Duration::from_millis(env_parse("LOCATE_POLL_MS", 500)),
            stability_poll_interval: Duration::from_millis(env_parse("STABILITY_POLL_MS", 200)),
            stability_required_polls: env_parse("STABILITY_REQUIRED_POLLS", 3),
            max_attempts: env_parse("RENDER_MAX_ATTEMPTS", 1),
            retry_backoff: Duration::from_secs(env_parse("RENDER_RETRY_BACKOFF_SECS", 10)),
            error_message_max_bytes: env_parse("ERROR_MESSAGE_MAX_BYTES", 4000),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_renders == 0 {
            return Err(WorkerError::config_error(
                "RENDER_MAX_CONCURRENT must be at least 1",
            ));
        }
        if self.artifact_extension.is_empty() {
            return Err(WorkerError::config_error("ARTIFACT_EXTENSION must not be empty"));
        }
        if self.script_file_name.is_empty()
            || self.script_file_name.contains(['/', '\\'])
            || self.script_file_name == ".."
        {
            return Err(WorkerError::config_error(format!(
                "SCRIPT_FILE_NAME must be a plain file name, got '{}'",
                self.script_file_name
            )));
        }
        if self.max_attempts == 0 {
            return Err(WorkerError::config_error("RENDER_MAX_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }

    /// Locator settings derived from the locate and stability fields.
    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            max_wait: self.locate_max_wait,
            poll_interval: self.locate_poll_interval,
            stability: StabilityCheck {
                interval: self.stability_poll_interval,
                required_polls: self.stability_required_polls,
            },
        }
    }

    /// Resolution folders to probe, the configured quality's first.
    pub fn resolutions(&self) -> Vec<String> {
        let mut dirs = vec![self.quality.resolution_dir().to_string()];
        for dir in KNOWN_RESOLUTIONS {
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_string());
            }
        }
        dirs
    }

    /// `NoRetry` unless more than one attempt is configured.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        if self.max_attempts <= 1 {
            Arc::new(NoRetry)
        } else {
            Arc::new(BoundedRetry::new(self.max_attempts, self.retry_backoff))
        }
    }
}

/// Retention sweep configuration.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// Jobs and artifacts older than this are deleted
    pub max_age_days: u32,
    pub interval: Duration,
    /// Scratch directories older than this are deleted; `None` keeps them
    pub scratch_retention_days: Option<u32>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_days: 30,
            interval: Duration::from_secs(24 * 60 * 60),
            scratch_retention_days: None,
        }
    }
}

impl CleanupConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("CLEANUP_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
            max_age_days: env_parse("CLEANUP_MAX_AGE_DAYS", 30),
            interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECS", 86400)),
            scratch_retention_days: std::env::var("SCRATCH_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
        }
    }
}
