//! Scene class detection in render scripts.

use std::sync::OnceLock;

use regex::Regex;

static CLASS_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn class_pattern() -> Option<&'static Regex> {
    CLASS_PATTERN
        .get_or_init(|| {
            Regex::new(r"(?m)^\s*class\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*:").ok()
        })
        .as_ref()
}

/// Name of the first class in `script` that derives from a `*Scene` base.
///
/// The renderer names its output after this class.
pub fn primary_scene_name(script: &str) -> Option<String> {
    class_pattern()?.captures_iter(script).find_map(|caps| {
        let bases = caps.get(2)?.as_str();
        let is_scene = bases
            .split(',')
            .map(|b| b.trim().rsplit('.').next().unwrap_or_default())
            .any(|b| b.ends_with("Scene"));
        is_scene.then(|| caps[1].to_string())
    })
}
