//! Renderer output markers and exit classification.

/// A substring the renderer prints at a known stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMarker {
    pub pattern: String,
    pub description: String,
}

impl OutputMarker {
    pub fn new(pattern: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            description: description.into(),
        }
    }
}

/// Marker tables used to interpret renderer output.
///
/// Progress markers are informational only. Success markers decide
/// whether a non-zero exit is tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMarkers {
    pub progress: Vec<OutputMarker>,
    pub success: Vec<String>,
}

impl Default for OutputMarkers {
    fn default() -> Self {
        Self {
            progress: vec![
                OutputMarker::new("Rendering animation", "animation rendering started"),
                OutputMarker::new("Animation duration", "animation duration reported"),
                OutputMarker::new("Writing to", "writing output"),
                OutputMarker::new("Combining to Movie file", "combining partial movies"),
                OutputMarker::new("Rendered", "scene rendered"),
                OutputMarker::new("Played", "animations played"),
                OutputMarker::new("File ready at", "file ready"),
            ],
            success: vec![
                "File ready at".to_string(),
                "Rendered".to_string(),
                "Played".to_string(),
            ],
        }
    }
}

impl OutputMarkers {
    /// Whether any success marker appears in `output`.
    pub fn has_success_marker(&self, output: &str) -> bool {
        self.success.iter().any(|m| output.contains(m.as_str()))
    }
}

/// Find the first progress marker contained in `line`.
pub fn detect_progress<'a>(markers: &'a [OutputMarker], line: &str) -> Option<&'a OutputMarker> {
    markers.iter().find(|m| line.contains(m.pattern.as_str()))
}

/// Outcome of a finished renderer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClassification {
    /// Clean exit
    Success,
    /// Non-zero exit, but the output shows the render completed.
    /// Seen on platforms where the renderer dies during teardown.
    SoftSuccess { exit_code: Option<i32> },
    /// Non-zero exit with no evidence of completion
    Failure { exit_code: Option<i32> },
}

impl ExitClassification {
    /// Classify from the process status and captured output.
    pub fn classify(
        exited_ok: bool,
        exit_code: Option<i32>,
        output: &str,
        markers: &OutputMarkers,
    ) -> Self {
        if exited_ok {
            ExitClassification::Success
        } else if markers.has_success_marker(output) {
            ExitClassification::SoftSuccess { exit_code }
        } else {
            ExitClassification::Failure { exit_code }
        }
    }

    /// Whether artifact discovery should proceed.
    pub fn is_success(&self) -> bool {
        !matches!(self, ExitClassification::Failure { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitClassification::Success => "success",
            ExitClassification::SoftSuccess { .. } => "soft_success",
            ExitClassification::Failure { .. } => "failure",
        }
    }
}
