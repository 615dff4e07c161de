//! Artifact discovery after a render finishes.
//!
//! The renderer's output location depends on its version, the scene class
//! name, the quality, and whether paths were wrapped in its log output, so
//! discovery runs a chain of [`ResolverStrategy`] implementations in order.
//! The first candidate that passes the stability gate wins. The whole chain
//! is retried on a fixed interval until a deadline.

mod scene;
mod stability;
mod strategies;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::cancelled;
use crate::error::{MediaError, MediaResult};

pub use scene::primary_scene_name;
pub use stability::{FsProbe, SizeProbe, StabilityCheck};
pub use strategies::{
    default_strategies, is_partial, DirectoryScanStrategy, LocateContext, OutputMarkerStrategy,
    RecursiveWalkStrategy, ResolverStrategy, SceneNameStrategy,
};

/// Discovery timing.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Give up after this long
    pub max_wait: Duration,
    /// Delay between passes over the strategy chain
    pub poll_interval: Duration,
    pub stability: StabilityCheck,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            stability: StabilityCheck::default(),
        }
    }
}

/// Finds the finished artifact of a render.
pub struct ArtifactLocator {
    config: LocatorConfig,
    strategies: Vec<Arc<dyn ResolverStrategy>>,
    probe: Arc<dyn SizeProbe>,
}

impl ArtifactLocator {
    /// Create a locator with the default strategy chain.
    pub fn new(config: LocatorConfig) -> Self {
        Self {
            config,
            strategies: default_strategies(),
            probe: Arc::new(FsProbe),
        }
    }

    /// Replace the strategy chain.
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn ResolverStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Replace the file size probe used by the stability check.
    pub fn with_probe(mut self, probe: Arc<dyn SizeProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Names of the strategies, in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Locate a stable artifact, or fail with `ArtifactNotFound` once
    /// `max_wait` has elapsed.
    pub async fn locate(
        &self,
        ctx: LocateContext,
        cancel: Option<&CancellationToken>,
    ) -> MediaResult<PathBuf> {
        let started = Instant::now();
        let deadline = started + self.config.max_wait;
        let ctx = Arc::new(ctx);
        let mut passes = 0u32;

        loop {
            passes += 1;
            for (strategy, path) in self.candidates(&ctx).await? {
                debug!(strategy, path = %path.display(), "Checking artifact candidate");
                if self
                    .config
                    .stability
                    .wait_stable(self.probe.as_ref(), &path, deadline)
                    .await
                {
                    info!(
                        strategy,
                        passes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Located artifact at {}",
                        path.display()
                    );
                    return Ok(path);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MediaError::ArtifactNotFound(self.config.max_wait));
            }
            let pause = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancelled(cancel) => return Err(MediaError::Cancelled),
            }
        }
    }

    /// Run every strategy once, in order, dropping duplicate paths.
    async fn candidates(&self, ctx: &Arc<LocateContext>) -> MediaResult<Vec<(&'static str, PathBuf)>> {
        let strategies = self.strategies.clone();
        let ctx = Arc::clone(ctx);

        tokio::task::spawn_blocking(move || {
            let mut found: Vec<(&'static str, PathBuf)> = Vec::new();
            for strategy in &strategies {
                if let Some(path) = strategy.resolve(&ctx) {
                    if !found.iter().any(|(_, p)| p == &path) {
                        found.push((strategy.name(), path));
                    }
                }
            }
            found
        })
        .await
        .map_err(|e| MediaError::Io(std::io::Error::other(e)))
    }
}

impl Default for ArtifactLocator {
    fn default() -> Self {
        Self::new(LocatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn fast_config(max_wait: Duration) -> LocatorConfig {
        LocatorConfig {
            max_wait,
            poll_interval: Duration::from_millis(50),
            stability: StabilityCheck {
                interval: Duration::from_millis(20),
                required_polls: 3,
            },
        }
    }

    fn context(work: &Path) -> LocateContext {
        LocateContext {
            work_dir: work.to_path_buf(),
            media_dir: work.join("media"),
            script_path: work.join("animation.py"),
            script: "class Demo(Scene):\n    pass\n".to_string(),
            render_output: String::new(),
            extension: "mp4".to_string(),
            resolutions: vec!["720p30".to_string()],
        }
    }

    #[tokio::test]
    async fn test_locates_file_written_after_start() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("media/videos/animation/720p30/Demo.mp4");

        let writer_target = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            tokio::fs::create_dir_all(writer_target.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(&writer_target, b"finished video").await.unwrap();
        });

        let locator = ArtifactLocator::new(fast_config(Duration::from_secs(5)));
        let found = locator.locate(context(dir.path()), None).await.unwrap();
        assert_eq!(found, target);
    }

    #[tokio::test]
    async fn test_gives_up_at_deadline() {
        let dir = TempDir::new().unwrap();
        let locator = ArtifactLocator::new(fast_config(Duration::from_millis(300)));

        let started = std::time::Instant::now();
        let err = locator.locate(context(dir.path()), None).await.unwrap_err();
        assert!(matches!(err, MediaError::ArtifactNotFound(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_partial_fragments_are_never_returned() {
        let dir = TempDir::new().unwrap();
        let partial = dir
            .path()
            .join("media/videos/animation/720p30/partial_movie_files/Demo/0001.mp4");
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, b"fragment").unwrap();

        let locator = ArtifactLocator::new(fast_config(Duration::from_millis(300)));
        let err = locator.locate(context(dir.path()), None).await.unwrap_err();
        assert!(matches!(err, MediaError::ArtifactNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let locator = ArtifactLocator::new(fast_config(Duration::from_secs(30)));
        let err = locator
            .locate(context(dir.path()), Some(&token))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(
            ArtifactLocator::default().strategy_names(),
            vec!["output_marker", "scene_name", "directory_scan", "recursive_walk"]
        );
    }
}
