//! Renderer CLI wrapper and artifact discovery.
//!
//! This crate provides:
//! - Renderer command building and supervised execution
//! - Concurrent stdout/stderr capture with progress marker logging
//! - Exit classification (success, soft-success, failure)
//! - Layered artifact discovery with a file stability gate
//! - Cross-device artifact moves

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod locator;
pub mod progress;

pub use command::{check_renderer, RenderOutput, RendererCommand, RendererRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{artifact_destination, move_file};
pub use locator::{
    default_strategies, primary_scene_name, ArtifactLocator, DirectoryScanStrategy, FsProbe,
    LocateContext, LocatorConfig, OutputMarkerStrategy, RecursiveWalkStrategy, ResolverStrategy,
    SceneNameStrategy, SizeProbe, StabilityCheck,
};
pub use progress::{detect_progress, ExitClassification, OutputMarker, OutputMarkers};
