//! Shared data models for the vertical mix pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Run configuration and selection constraints
//! - Source videos, segments and their scores
//! - Face profiles and frame geometry
//! - The assembly plan and output specification
//! - The structured run report

pub mod config;
pub mod encoding;
pub mod face;
pub mod mode;
pub mod plan;
pub mod rect;
pub mod report;
pub mod request;
pub mod segment;

// Re-export common types
pub use config::{
    is_supported_container, ConfigError, MixConfig, SelectionConstraints, DURATION_EPSILON,
    SUPPORTED_EXTENSIONS,
};
pub use encoding::{AudioTrack, EncodingConfig, LogoOverlay, OutputSpec};
pub use face::{FaceEmbedding, FaceProfile, DEFAULT_FACE_THRESHOLD, NEUTRAL_FACE_SCORE};
pub use mode::{AnalysisMode, AnalysisParams, LogoPosition, ModeParseError, ResamplingFilter, TextHandlingMode};
pub use plan::{AssemblyPlan, CropDecision, PlanEntry, TextAction};
pub use rect::{merge_overlapping, NormalizedRect, PixelRect};
pub use report::{RunId, RunReport, RunWarning, SourceReport};
pub use request::RunRequest;
pub use segment::{ScoreWeights, ScoredSegment, Segment, SegmentEvidence, SegmentScore, SourceId, SourceVideo};
