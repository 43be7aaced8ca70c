#![deny(unreachable_patterns)]
//! Media layer for the vertical mix pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a cancellable runner
//! - Progress parsing from `-progress pipe:2`
//! - Probing and lazy frame decoding
//! - Face matching and burned-in text detection on decoded frames
//! - Candidate window analysis and scoring
//! - Crop planning, text handling and the render commands for assembly

pub mod analyzer;
pub mod audio;
pub mod command;
pub mod error;
pub mod face;
pub mod filters;
pub mod frames;
pub mod fs_utils;
mod grid;
pub mod probe;
pub mod progress;
pub mod render;
pub mod signals;
pub mod text;
pub mod transform;

pub use analyzer::{plan_windows, AnalyzerSettings, ClipAnalyzer, SourceAnalysis};
pub use audio::{audio_filter_chain, resolve_main_duration};
pub use command::{check_ffmpeg, check_ffprobe, CommandRunner, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use face::{
    build_face_profile, load_reference_image, DetectedFace, EmbeddingFaceMatcher, FaceDetector, FaceEmbedder,
    FaceMatch, FaceMatcher, PatchEmbedder, SkinToneFaceDetector,
};
pub use frames::{FfmpegFrameSource, Frame, FrameRequest, FrameSource, FrameStream, GeneratedFrameSource};
pub use fs_utils::{move_file, remove_if_exists};
pub use probe::{probe_duration, probe_source, probe_video, Ffprobe, MediaProbe, VideoInfo};
pub use progress::{log_progress, FfmpegProgress};
pub use text::{text_penalty, EdgeDensityTextDetector, TextRegionDetector};
pub use transform::{plan_crop, segment_filter_chain, transform_frame, DelogoInpaint, InpaintFilter};
