//! Run configuration, validated once at run start.
//!
//! `MixConfig` is the user-facing knob set. It is checked by
//! [`MixConfig::validate`] and then turned into the immutable
//! [`SelectionConstraints`] every stage reads from.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::encoding::EncodingConfig;
use crate::face::DEFAULT_FACE_THRESHOLD;
use crate::mode::{AnalysisMode, ResamplingFilter, TextHandlingMode};
use crate::segment::ScoreWeights;

/// Accepted source containers (lowercase, with dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".avi", ".webm", ".mkv"];

pub const TARGET_DURATION_RANGE: (f64, f64) = (15.0, 600.0);
pub const CLIP_COUNT_RANGE: (u32, u32) = (1, 50);
pub const CLIP_DURATION_RANGE: (f64, f64) = (2.0, 30.0);

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("min_clip_duration ({min}) exceeds max_clip_duration ({max})")]
    InvertedClipRange { min: f64, max: f64 },

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(PathBuf),

    #[error("No source videos supplied")]
    NoSources,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, min, max })
    }
}

/// Whether `path` has one of [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported_container(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let dotted = format!(".{}", ext.to_lowercase());
            SUPPORTED_EXTENSIONS.contains(&dotted.as_str())
        })
        .unwrap_or(false)
}

/// User-facing run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MixConfig {
    // === Duration & count ===
    /// Requested total duration of the main content (seconds)
    pub target_duration: f64,
    /// Allowed deviation from the target (seconds)
    pub duration_tolerance: f64,
    /// Hard cap on clips in the output
    pub clip_count: u32,
    pub min_clip_duration: f64,
    pub max_clip_duration: f64,

    // === Analysis ===
    pub analysis_mode: AnalysisMode,
    /// Seconds skipped at the start of every source
    pub exclude_head_seconds: f64,
    /// Seconds skipped at the end of every source
    pub exclude_tail_seconds: f64,
    /// Maximum normalized embedding distance for a face match
    pub face_threshold: f64,
    pub weights: ScoreWeights,

    // === Selection ===
    /// No two consecutive clips from the same source
    pub diversity: bool,
    pub text_handling: TextHandlingMode,
    /// Text coverage above which a segment does not qualify in avoid mode
    pub text_ceiling: f64,
    /// Composite score below which a segment does not qualify
    pub min_score: f64,
    pub max_clips_per_source: Option<u32>,

    // === Output ===
    pub resampling: ResamplingFilter,
    pub sync_duration_to_audio: bool,
    pub encoding: EncodingConfig,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            target_duration: 60.0,
            duration_tolerance: 2.0,
            clip_count: 15,
            min_clip_duration: 3.0,
            max_clip_duration: 8.0,

            analysis_mode: AnalysisMode::Fast,
            exclude_head_seconds: 0.0,
            exclude_tail_seconds: 0.0,
            face_threshold: DEFAULT_FACE_THRESHOLD,
            weights: ScoreWeights::default(),

            diversity: true,
            text_handling: TextHandlingMode::Avoid,
            text_ceiling: 0.05,
            min_score: 0.0,
            max_clips_per_source: None,

            resampling: ResamplingFilter::Standard,
            sync_duration_to_audio: false,
            encoding: EncodingConfig::default(),
        }
    }
}

impl MixConfig {
    /// Sparse analysis and the standard scaler.
    pub fn fast() -> Self {
        Self {
            analysis_mode: AnalysisMode::Fast,
            resampling: ResamplingFilter::Standard,
            ..Default::default()
        }
    }

    /// Dense analysis, Lanczos scaling and a slower encoder preset.
    pub fn quality() -> Self {
        Self {
            analysis_mode: AnalysisMode::VeryPrecise,
            resampling: ResamplingFilter::HighQuality,
            encoding: EncodingConfig::default().with_preset("medium").with_crf(16),
            ..Default::default()
        }
    }

    /// Short, punchy cuts for vertical feeds.
    pub fn tiktok() -> Self {
        Self {
            target_duration: 30.0,
            clip_count: 10,
            min_clip_duration: 2.0,
            max_clip_duration: 5.0,
            analysis_mode: AnalysisMode::Precise,
            ..Default::default()
        }
    }

    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "target_duration",
            self.target_duration,
            TARGET_DURATION_RANGE.0,
            TARGET_DURATION_RANGE.1,
        )?;
        check_range(
            "clip_count",
            self.clip_count as f64,
            CLIP_COUNT_RANGE.0 as f64,
            CLIP_COUNT_RANGE.1 as f64,
        )?;
        check_range(
            "min_clip_duration",
            self.min_clip_duration,
            CLIP_DURATION_RANGE.0,
            CLIP_DURATION_RANGE.1,
        )?;
        check_range(
            "max_clip_duration",
            self.max_clip_duration,
            CLIP_DURATION_RANGE.0,
            CLIP_DURATION_RANGE.1,
        )?;
        if self.min_clip_duration > self.max_clip_duration {
            return Err(ConfigError::InvertedClipRange {
                min: self.min_clip_duration,
                max: self.max_clip_duration,
            });
        }

        check_range("duration_tolerance", self.duration_tolerance, 0.0, self.target_duration)?;
        check_range("face_threshold", self.face_threshold, f64::MIN_POSITIVE, 1.0)?;
        check_range("text_ceiling", self.text_ceiling, 0.0, 1.0)?;
        check_range("min_score", self.min_score, 0.0, 1.0)?;
        check_range("exclude_head_seconds", self.exclude_head_seconds, 0.0, f64::MAX)?;
        check_range("exclude_tail_seconds", self.exclude_tail_seconds, 0.0, f64::MAX)?;

        for (field, w) in [
            ("weights.face", self.weights.face),
            ("weights.text", self.weights.text),
            ("weights.quality", self.weights.quality),
        ] {
            check_range(field, w, 0.0, 100.0)?;
        }

        if self.max_clips_per_source == Some(0) {
            return Err(ConfigError::Invalid(
                "max_clips_per_source must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Immutable selection view of this configuration.
    pub fn constraints(&self) -> SelectionConstraints {
        SelectionConstraints {
            target_duration: self.target_duration,
            tolerance: self.duration_tolerance,
            min_clip_duration: self.min_clip_duration,
            max_clip_duration: self.max_clip_duration,
            max_clip_count: self.clip_count as usize,
            diversity: self.diversity,
            text_handling: self.text_handling,
            text_ceiling: self.text_ceiling,
            min_score: self.min_score,
            max_clips_per_source: self.max_clips_per_source.map(|n| n as usize),
        }
    }
}

/// Float slack used when comparing durations.
pub const DURATION_EPSILON: f64 = 1e-6;

/// Hard limits the selector works under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectionConstraints {
    pub target_duration: f64,
    pub tolerance: f64,
    pub min_clip_duration: f64,
    pub max_clip_duration: f64,
    pub max_clip_count: usize,
    pub diversity: bool,
    pub text_handling: TextHandlingMode,
    pub text_ceiling: f64,
    pub min_score: f64,
    pub max_clips_per_source: Option<usize>,
}

impl SelectionConstraints {
    pub fn lower_bound(&self) -> f64 {
        (self.target_duration - self.tolerance).max(0.0)
    }

    pub fn upper_bound(&self) -> f64 {
        self.target_duration + self.tolerance
    }

    /// Whether a clip length is within the per-clip bounds.
    pub fn accepts_clip_length(&self, duration: f64) -> bool {
        duration + DURATION_EPSILON >= self.min_clip_duration
            && duration <= self.max_clip_duration + DURATION_EPSILON
    }

    /// Length every analysis window aims for.
    ///
    /// Picks a clip count near `target / mid` that the count cap and the
    /// per-clip bounds allow, so equal-length windows can add up to the target.
    pub fn planned_clip_length(&self) -> f64 {
        let min = self.min_clip_duration;
        let max = self.max_clip_duration.max(min);
        let target = self.target_duration;
        let mid = (min + max) / 2.0;

        let lo = (target / max).ceil().max(1.0);
        let hi = (self.max_clip_count as f64)
            .min((target / min).floor())
            .max(1.0);
        let n = (target / mid).round().max(lo).min(hi).max(1.0);

        (target / n).max(min).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        MixConfig::default().validate().unwrap();
        MixConfig::fast().validate().unwrap();
        MixConfig::quality().validate().unwrap();
        MixConfig::tiktok().validate().unwrap();
    }

    #[test]
    fn test_range_violations() {
        let config = MixConfig {
            target_duration: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "target_duration", .. })
        ));

        let config = MixConfig {
            clip_count: 51,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MixConfig {
            min_clip_duration: 10.0,
            max_clip_duration: 4.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedClipRange { .. })
        ));

        let config = MixConfig {
            face_threshold: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supported_containers() {
        assert!(is_supported_container(Path::new("a/b/clip.MP4")));
        assert!(is_supported_container(Path::new("clip.webm")));
        assert!(!is_supported_container(Path::new("clip.gif")));
        assert!(!is_supported_container(Path::new("clip")));
    }

    #[test]
    fn test_bounds() {
        let c = MixConfig::tiktok().constraints();
        assert_eq!(c.lower_bound(), 28.0);
        assert_eq!(c.upper_bound(), 32.0);
        assert!(c.accepts_clip_length(2.0));
        assert!(c.accepts_clip_length(5.0));
        assert!(!c.accepts_clip_length(5.5));
        assert!(!c.accepts_clip_length(1.9));
    }

    #[test]
    fn test_planned_clip_length() {
        // 30s from 2-5s clips, at most 10: nine clips of 3.33s
        let c = MixConfig::tiktok().constraints();
        let p = c.planned_clip_length();
        assert!((p - 30.0 / 9.0).abs() < 1e-9);

        // Count cap forces the longest clips
        let c = SelectionConstraints {
            target_duration: 60.0,
            max_clip_count: 10,
            ..MixConfig::tiktok().constraints()
        };
        assert_eq!(c.planned_clip_length(), 5.0);

        // Always inside the per-clip bounds
        for target in [15.0, 37.0, 120.0, 600.0] {
            let c = SelectionConstraints {
                target_duration: target,
                ..MixConfig::default().constraints()
            };
            let p = c.planned_clip_length();
            assert!(c.accepts_clip_length(p), "target {target} gave {p}");
        }
    }
}
