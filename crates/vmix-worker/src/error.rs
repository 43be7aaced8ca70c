//! Pipeline error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use vmix_media::MediaError;
use vmix_models::{ConfigError, SourceId};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Assembly step an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblyStage {
    Transform,
    Concatenate,
    Audio,
    Logo,
    Tagline,
    Encode,
    Finalize,
}

impl AssemblyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyStage::Transform => "transform",
            AssemblyStage::Concatenate => "concatenate",
            AssemblyStage::Audio => "audio",
            AssemblyStage::Logo => "logo",
            AssemblyStage::Tagline => "tagline",
            AssemblyStage::Encode => "encode",
            AssemblyStage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("No face found in reference photo {0}")]
    NoFaceInReference(PathBuf),

    #[error("No usable input: all {skipped} sources were skipped")]
    NoUsableInput { skipped: usize },

    #[error("No segment could be selected from the analyzed sources")]
    EmptySelection,

    #[error("Assembly failed at {stage}: {source}")]
    Assembly {
        stage: AssemblyStage,
        source: MediaError,
    },

    #[error("Resources exhausted analyzing {source_id}: {reason}")]
    ResourceExhausted { source_id: SourceId, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Tag a media failure with the assembly stage it happened in.
    ///
    /// A cancelled FFmpeg process is reported as a cancelled run.
    pub fn assembly(stage: AssemblyStage, err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            source => Self::Assembly { stage, source },
        }
    }

    /// Assembly stage of the failure, if it happened during assembly.
    pub fn stage(&self) -> Option<AssemblyStage> {
        match self {
            PipelineError::Assembly { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the run failed, as opposed to being stopped on request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Cancelled)
    }

    /// Check if a rerun with the same inputs could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ResourceExhausted { .. } | PipelineError::Io(_) | PipelineError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_errors_carry_stage() {
        let err = PipelineError::assembly(AssemblyStage::Logo, MediaError::FileNotFound("logo.png".into()));
        assert_eq!(err.stage(), Some(AssemblyStage::Logo));
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Assembly failed at logo: File not found: logo.png");
    }

    #[test]
    fn test_cancelled_ffmpeg_is_a_cancelled_run() {
        let err = PipelineError::assembly(AssemblyStage::Encode, MediaError::Cancelled);
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!err.is_fatal());
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_retryable() {
        let err = PipelineError::ResourceExhausted {
            source_id: SourceId(3),
            reason: "analysis timed out at fast".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("source-3"));
        assert!(!PipelineError::EmptySelection.is_retryable());
    }
}
