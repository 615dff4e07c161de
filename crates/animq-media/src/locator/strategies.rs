//! Artifact resolution strategies, tried in priority order.

use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use super::scene::primary_scene_name;

/// Renderer's scratch directory for per-animation fragments.
const PARTIAL_DIR: &str = "partial_movie_files";

/// Lines after the ready marker that may still belong to the wrapped path.
const MARKER_LOOKAHEAD_LINES: usize = 6;

/// Everything a strategy may inspect about one finished render.
#[derive(Debug, Clone)]
pub struct LocateContext {
    /// Renderer working directory
    pub work_dir: PathBuf,
    /// Media directory passed to the renderer, relative to `work_dir` if not absolute
    pub media_dir: PathBuf,
    /// Script file handed to the renderer
    pub script_path: PathBuf,
    /// Script text
    pub script: String,
    /// Captured renderer output
    pub render_output: String,
    /// Artifact extension without the dot
    pub extension: String,
    /// Resolution directory names, most likely first
    pub resolutions: Vec<String>,
}

impl LocateContext {
    /// Module name the renderer files output under: the script's stem.
    pub fn module_name(&self) -> Option<String> {
        self.script_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
    }

    /// Media directory resolved against the working directory.
    pub fn resolved_media_dir(&self) -> PathBuf {
        if self.media_dir.is_absolute() {
            self.media_dir.clone()
        } else {
            self.work_dir.join(&self.media_dir)
        }
    }

    /// Directories that may contain output, media directory first.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.resolved_media_dir()];
        if !roots.contains(&self.work_dir) {
            roots.push(self.work_dir.clone());
        }
        roots
    }

    /// `<root>/videos/{<module>,-,}/<resolution>` for every root.
    pub fn video_dirs(&self) -> Vec<PathBuf> {
        let mut groups = Vec::new();
        if let Some(module) = self.module_name() {
            groups.push(module);
        }
        groups.push("-".to_string());
        groups.push(String::new());

        let mut dirs = Vec::new();
        for root in self.search_roots() {
            let videos = root.join("videos");
            for group in &groups {
                let base = if group.is_empty() {
                    videos.clone()
                } else {
                    videos.join(group)
                };
                for resolution in &self.resolutions {
                    dirs.push(base.join(resolution));
                }
            }
        }
        dirs
    }

    pub fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(&self.extension))
    }

    fn absolutize(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.work_dir.join(path)
        }
    }
}

/// Whether `path` lies under a partial-fragment directory.
pub fn is_partial(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == PARTIAL_DIR))
}

/// One way of finding the artifact for a finished render.
pub trait ResolverStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Return a candidate path, or `None` if this strategy finds nothing.
    /// Runs on a blocking thread.
    fn resolve(&self, ctx: &LocateContext) -> Option<PathBuf>;
}

/// Reads the path the renderer announces after its ready marker.
#[derive(Debug, Clone)]
pub struct OutputMarkerStrategy {
    marker: String,
}

impl Default for OutputMarkerStrategy {
    fn default() -> Self {
        Self::new("File ready at")
    }
}

impl OutputMarkerStrategy {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    fn announced_path(&self, tail: &str, ctx: &LocateContext) -> Option<PathBuf> {
        let lines: Vec<&str> = tail.lines().take(MARKER_LOOKAHEAD_LINES).collect();

        // Wrapped paths are split across indented lines; rejoin the fragments.
        let joined: String = lines.iter().map(|l| l.trim()).collect();
        if let Some(path) = quoted_with_extension(&joined, &ctx.extension) {
            return Some(PathBuf::from(path));
        }

        lines
            .iter()
            .flat_map(|l| l.split_whitespace())
            .map(|t| t.trim_matches(|c| c == '\'' || c == '"'))
            .find(|t| ctx.has_extension(Path::new(t)))
            .map(PathBuf::from)
    }
}

fn quoted_with_extension<'a>(text: &'a str, extension: &str) -> Option<&'a str> {
    let suffix = format!(".{}", extension.to_ascii_lowercase());
    let mut rest = text;
    while let Some(open) = rest.find(['\'', '"']) {
        let quote = rest[open..].chars().next()?;
        let after = &rest[open + 1..];
        let close = after.find(quote)?;
        let inner = &after[..close];
        if inner.to_ascii_lowercase().ends_with(&suffix) {
            return Some(inner);
        }
        rest = &after[close + 1..];
    }
    None
}

impl ResolverStrategy for OutputMarkerStrategy {
    fn name(&self) -> &'static str {
        "output_marker"
    }

    fn resolve(&self, ctx: &LocateContext) -> Option<PathBuf> {
        ctx.render_output
            .match_indices(self.marker.as_str())
            .filter_map(|(idx, m)| self.announced_path(&ctx.render_output[idx + m.len()..], ctx))
            .map(|p| ctx.absolutize(p))
            .find(|p| !is_partial(p) && ctx.has_extension(p) && p.is_file())
    }
}

/// Builds the expected path from the script's primary scene class.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneNameStrategy;

impl ResolverStrategy for SceneNameStrategy {
    fn name(&self) -> &'static str {
        "scene_name"
    }

    fn resolve(&self, ctx: &LocateContext) -> Option<PathBuf> {
        let scene = primary_scene_name(&ctx.script)?;
        let file_name = format!("{scene}.{}", ctx.extension);
        ctx.video_dirs()
            .into_iter()
            .chain(ctx.search_roots())
            .map(|dir| dir.join(&file_name))
            .find(|p| p.is_file())
    }
}

/// Lists the expected output directories for any artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryScanStrategy;

impl ResolverStrategy for DirectoryScanStrategy {
    fn name(&self) -> &'static str {
        "directory_scan"
    }

    fn resolve(&self, ctx: &LocateContext) -> Option<PathBuf> {
        for dir in ctx.video_dirs().into_iter().chain(ctx.search_roots()) {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file() && ctx.has_extension(p) && !is_partial(p))
                .collect();
            files.sort();
            if let Some(first) = files.into_iter().next() {
                return Some(first);
            }
        }
        None
    }
}

/// Walks the search roots, skipping partial fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecursiveWalkStrategy;

impl ResolverStrategy for RecursiveWalkStrategy {
    fn name(&self) -> &'static str {
        "recursive_walk"
    }

    fn resolve(&self, ctx: &LocateContext) -> Option<PathBuf> {
        ctx.search_roots().into_iter().find_map(|root| {
            WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != PARTIAL_DIR)
                .filter_map(Result::ok)
                .find(|e| e.file_type().is_file() && ctx.has_extension(e.path()))
                .map(|e| e.into_path())
        })
    }
}

/// The standard chain: announced path, scene name, directory scan, full walk.
pub fn default_strategies() -> Vec<Arc<dyn ResolverStrategy>> {
    vec![
        Arc::new(OutputMarkerStrategy::default()),
        Arc::new(SceneNameStrategy),
        Arc::new(DirectoryScanStrategy),
        Arc::new(RecursiveWalkStrategy),
    ]
}
