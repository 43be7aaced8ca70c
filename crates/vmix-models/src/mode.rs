//! Enumerated run options: analysis fidelity, text handling, resampling, logo placement.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an option string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: {value}")]
pub struct ModeParseError {
    kind: &'static str,
    value: String,
}

impl ModeParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Analysis mode
// =============================================================================

/// Sampling parameters derived from an [`AnalysisMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    /// Distance between consecutive candidate window starts (seconds)
    pub window_step: f64,
    /// Frames decoded per second of source video
    pub sample_fps: f64,
    /// Upper bound on candidate windows per source
    pub max_windows: usize,
    /// Height of decoded analysis frames in pixels
    pub analysis_height: u32,
}

/// Analysis fidelity. Denser modes trade wall-clock time for score fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Sparse sampling
    #[default]
    Fast,
    /// Denser sampling
    Precise,
    /// Densest sampling
    #[serde(alias = "very-precise")]
    VeryPrecise,
}

impl AnalysisMode {
    pub const ALL: &'static [AnalysisMode] = &[
        AnalysisMode::Fast,
        AnalysisMode::Precise,
        AnalysisMode::VeryPrecise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Fast => "fast",
            AnalysisMode::Precise => "precise",
            AnalysisMode::VeryPrecise => "very_precise",
        }
    }

    /// Sampling parameters for this mode.
    pub fn params(&self) -> AnalysisParams {
        match self {
            AnalysisMode::Fast => AnalysisParams {
                window_step: 3.0,
                sample_fps: 1.0,
                max_windows: 30,
                analysis_height: 240,
            },
            AnalysisMode::Precise => AnalysisParams {
                window_step: 1.5,
                sample_fps: 2.0,
                max_windows: 60,
                analysis_height: 360,
            },
            AnalysisMode::VeryPrecise => AnalysisParams {
                window_step: 1.0,
                sample_fps: 4.0,
                max_windows: 100,
                analysis_height: 480,
            },
        }
    }

    /// The next cheaper mode, or `None` when already at the cheapest.
    pub fn degrade(&self) -> Option<AnalysisMode> {
        match self {
            AnalysisMode::VeryPrecise => Some(AnalysisMode::Precise),
            AnalysisMode::Precise => Some(AnalysisMode::Fast),
            AnalysisMode::Fast => None,
        }
    }

    /// Stable ordinal, cheapest first.
    pub fn rank(&self) -> u8 {
        match self {
            AnalysisMode::Fast => 0,
            AnalysisMode::Precise => 1,
            AnalysisMode::VeryPrecise => 2,
        }
    }

    pub fn from_rank(rank: u8) -> AnalysisMode {
        match rank {
            0 => AnalysisMode::Fast,
            1 => AnalysisMode::Precise,
            _ => AnalysisMode::VeryPrecise,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(AnalysisMode::Fast),
            "precise" => Ok(AnalysisMode::Precise),
            "very_precise" => Ok(AnalysisMode::VeryPrecise),
            _ => Err(ModeParseError::new("analysis mode", s)),
        }
    }
}

// =============================================================================
// Text handling
// =============================================================================

/// How burned-in text is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextHandlingMode {
    /// Segments above the text ceiling are not selected
    #[default]
    Avoid,
    /// Crop rectangle is moved or shrunk to exclude text
    Crop,
    /// Text pixels are filled from their neighborhood
    Inpaint,
}

impl TextHandlingMode {
    pub const ALL: &'static [TextHandlingMode] = &[
        TextHandlingMode::Avoid,
        TextHandlingMode::Crop,
        TextHandlingMode::Inpaint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TextHandlingMode::Avoid => "avoid",
            TextHandlingMode::Crop => "crop",
            TextHandlingMode::Inpaint => "inpaint",
        }
    }
}

impl fmt::Display for TextHandlingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TextHandlingMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "avoid" => Ok(TextHandlingMode::Avoid),
            "crop" => Ok(TextHandlingMode::Crop),
            "inpaint" => Ok(TextHandlingMode::Inpaint),
            _ => Err(ModeParseError::new("text handling mode", s)),
        }
    }
}

// =============================================================================
// Resampling
// =============================================================================

/// Scaling filter used when normalizing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingFilter {
    /// Bicubic, faster
    #[default]
    Standard,
    /// Lanczos, sharper and slower
    #[serde(alias = "high-quality")]
    HighQuality,
}

impl ResamplingFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResamplingFilter::Standard => "standard",
            ResamplingFilter::HighQuality => "high_quality",
        }
    }

    /// Value for FFmpeg's `scale=...:flags=` option.
    pub fn ffmpeg_flags(&self) -> &'static str {
        match self {
            ResamplingFilter::Standard => "bicubic",
            ResamplingFilter::HighQuality => "lanczos",
        }
    }
}

impl fmt::Display for ResamplingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResamplingFilter {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(ResamplingFilter::Standard),
            "high_quality" | "lanczos" => Ok(ResamplingFilter::HighQuality),
            _ => Err(ModeParseError::new("resampling filter", s)),
        }
    }
}

// =============================================================================
// Logo placement
// =============================================================================

/// Anchor for the logo overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogoPosition {
    #[default]
    #[serde(alias = "top-left")]
    TopLeft,
    #[serde(alias = "top-center")]
    TopCenter,
    #[serde(alias = "top-right")]
    TopRight,
    #[serde(alias = "bottom-left")]
    BottomLeft,
    #[serde(alias = "bottom-right")]
    BottomRight,
}

impl LogoPosition {
    pub const ALL: &'static [LogoPosition] = &[
        LogoPosition::TopLeft,
        LogoPosition::TopCenter,
        LogoPosition::TopRight,
        LogoPosition::BottomLeft,
        LogoPosition::BottomRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogoPosition::TopLeft => "top_left",
            LogoPosition::TopCenter => "top_center",
            LogoPosition::TopRight => "top_right",
            LogoPosition::BottomLeft => "bottom_left",
            LogoPosition::BottomRight => "bottom_right",
        }
    }
}

impl fmt::Display for LogoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogoPosition {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "top_left" => Ok(LogoPosition::TopLeft),
            "top_center" => Ok(LogoPosition::TopCenter),
            "top_right" => Ok(LogoPosition::TopRight),
            "bottom_left" => Ok(LogoPosition::BottomLeft),
            "bottom_right" => Ok(LogoPosition::BottomRight),
            _ => Err(ModeParseError::new("logo position", s)),
        }
    }
}
