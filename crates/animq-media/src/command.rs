//! Renderer command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use animq_models::RenderQuality;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{detect_progress, ExitClassification, OutputMarker, OutputMarkers};

/// How long to wait for the output readers after the process is gone.
/// A grandchild holding the pipes open would otherwise stall the worker.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Builder for renderer invocations.
///
/// Arguments are laid out as
/// `<base_args> <quality flag> --media_dir <media_dir> <extra_args> <script>`.
#[derive(Debug, Clone)]
pub struct RendererCommand {
    program: String,
    base_args: Vec<String>,
    quality: RenderQuality,
    media_dir: PathBuf,
    script: PathBuf,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    extra_args: Vec<String>,
}

impl RendererCommand {
    /// Create a command running `program` on `script`.
    pub fn new(program: impl Into<String>, script: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            quality: RenderQuality::default(),
            media_dir: PathBuf::from("media"),
            script: script.as_ref().to_path_buf(),
            working_dir: None,
            env: Vec::new(),
            extra_args: Vec::new(),
        }
    }

    /// Arguments placed before the quality flag, e.g. `-m manim render`.
    pub fn base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the quality flag.
    pub fn quality(mut self, quality: RenderQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Directory the renderer writes its media tree into.
    pub fn media_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.media_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Working directory of the renderer process.
    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable for the child. An empty value is kept
    /// as an empty string, not removed.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Arguments placed just before the script path.
    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push(self.quality.flag().to_string());
        args.push("--media_dir".to_string());
        args.push(self.media_dir.to_string_lossy().to_string());
        args.extend(self.extra_args.iter().cloned());
        args.push(self.script.to_string_lossy().to_string());
        args
    }
}

/// Captured result of a renderer process that ran to exit.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Whether the process reported success
    pub exited_ok: bool,
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, one line per line read
    pub output: String,
    pub elapsed: Duration,
}

/// Check that the renderer program can be resolved.
pub fn check_renderer(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::RendererNotFound(program.to_string()))
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Runs renderer commands with output capture, cancellation and a hard timeout.
#[derive(Debug, Clone, Default)]
pub struct RendererRunner {
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
    markers: OutputMarkers,
}

impl RendererRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the process when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Kill the renderer once it has run for `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use custom progress and success markers.
    pub fn with_markers(mut self, markers: OutputMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn markers(&self) -> &OutputMarkers {
        &self.markers
    }

    /// Classify a finished run against this runner's success markers.
    pub fn classify(&self, output: &RenderOutput) -> ExitClassification {
        ExitClassification::classify(
            output.exited_ok,
            output.exit_code,
            &output.output,
            &self.markers,
        )
    }

    /// Run the command to completion.
    ///
    /// A non-zero exit is not an error here; callers classify the output.
    pub async fn run(&self, cmd: &RendererCommand) -> MediaResult<RenderOutput> {
        check_renderer(cmd.program())?;

        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(MediaError::Cancelled);
        }

        let args = cmd.build_args();
        debug!("Running renderer: {} {}", cmd.program(), args.join(" "));

        let mut command = Command::new(cmd.program());
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let started = Instant::now();
        let mut child = command.spawn()?;

        let buffer = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(
                stdout,
                "stdout",
                Arc::clone(&buffer),
                self.markers.progress.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                stderr,
                "stderr",
                Arc::clone(&buffer),
                self.markers.progress.clone(),
            ));
        }

        match self.wait(&mut child).await {
            Waited::Exited(status) => {
                let status = status?;
                finish_readers(readers).await;
                let output = buffer.lock().await.clone();
                let elapsed = started.elapsed();
                debug!(
                    exit_code = ?status.code(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Renderer exited"
                );
                Ok(RenderOutput {
                    exited_ok: status.success(),
                    exit_code: status.code(),
                    output,
                    elapsed,
                })
            }
            Waited::Cancelled => {
                info!("Render cancelled, killing renderer");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill renderer: {}", e);
                }
                finish_readers(readers).await;
                Err(MediaError::Cancelled)
            }
            Waited::TimedOut => {
                let limit = self.timeout.unwrap_or_default();
                warn!("Renderer timed out after {:?}, killing process", limit);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill renderer: {}", e);
                }
                finish_readers(readers).await;
                Err(MediaError::Timeout(limit))
            }
        }
    }

    async fn wait(&self, child: &mut Child) -> Waited {
        tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = cancelled(self.cancel.as_ref()) => Waited::Cancelled,
            _ = expired(self.timeout) => Waited::TimedOut,
        }
    }
}

pub(crate) async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn expired(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: &'static str,
    buffer: Arc<Mutex<String>>,
    markers: Vec<OutputMarker>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(stream, "Stopped reading renderer output: {}", e);
                    break;
                }
            }
            // Non-UTF-8 output must not stop the drain.
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(marker) = detect_progress(&markers, line) {
                debug!(stream, marker = %marker.description, "{}", line.trim());
            } else {
                trace!(stream, "{}", line);
            }
            let mut buf = buffer.lock().await;
            buf.push_str(line);
            buf.push('\n');
        }
    })
}

async fn finish_readers(readers: Vec<JoinHandle<()>>) {
    for mut handle in readers {
        if tokio::time::timeout(READER_GRACE, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}
