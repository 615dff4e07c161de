//! Renderer quality presets.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Output quality passed to the renderer.
///
/// Each preset maps to a command-line flag and to the per-resolution
/// folder the renderer writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderQuality {
    Low,
    #[default]
    Medium,
    High,
    Production,
    FourK,
}

#[derive(Debug, Clone, Error)]
#[error("unknown render quality: {0}")]
pub struct ParseQualityError(String);

impl RenderQuality {
    /// Command-line flag selecting this preset.
    pub fn flag(&self) -> &'static str {
        match self {
            RenderQuality::Low => "-ql",
            RenderQuality::Medium => "-qm",
            RenderQuality::High => "-qh",
            RenderQuality::Production => "-qp",
            RenderQuality::FourK => "-qk",
        }
    }

    /// Resolution folder name (`<height>p<fps>`).
    pub fn resolution_dir(&self) -> &'static str {
        match self {
            RenderQuality::Low => "480p15",
            RenderQuality::Medium => "720p30",
            RenderQuality::High => "1080p60",
            RenderQuality::Production => "1440p60",
            RenderQuality::FourK => "2160p60",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderQuality::Low => "low",
            RenderQuality::Medium => "medium",
            RenderQuality::High => "high",
            RenderQuality::Production => "production",
            RenderQuality::FourK => "fourk",
        }
    }
}

impl FromStr for RenderQuality {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "l" => Ok(RenderQuality::Low),
            "medium" | "m" => Ok(RenderQuality::Medium),
            "high" | "h" => Ok(RenderQuality::High),
            "production" | "p" => Ok(RenderQuality::Production),
            "fourk" | "4k" | "k" => Ok(RenderQuality::FourK),
            other => Err(ParseQualityError(other.to_string())),
        }
    }
}
