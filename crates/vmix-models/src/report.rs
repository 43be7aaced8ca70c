//! Structured run report returned alongside the rendered file.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::mode::AnalysisMode;
use crate::segment::SourceId;

/// Unique identifier for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-fatal events surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// A source could not be decoded and was skipped
    UnreadableSource { source: SourceId, reason: String },
    /// A readable source contributed no selected segment
    NoAcceptedSegments { source: SourceId },
    /// Selected content is shorter than the requested lower bound
    InsufficientContent { requested: f64, achieved: f64 },
    /// Adjacent clips share a source because diversity was relaxed
    DiversityRelaxed { adjacent_repeats: usize },
    /// Analysis fell back to a cheaper mode after a time budget overrun
    AnalysisDegraded {
        source: SourceId,
        from: AnalysisMode,
        to: AnalysisMode,
    },
    /// The audio track set the final duration instead of the target
    AudioPrecedence { target: f64, audio: f64 },
}

/// Per-source outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceReport {
    pub source: SourceId,
    pub path: PathBuf,
    /// Segments placed in the output
    pub accepted: usize,
    /// Candidate windows discarded by analysis or passed over by selection
    pub rejected: usize,
    /// The source was skipped entirely
    pub skipped: bool,
}

impl SourceReport {
    pub fn new(source: SourceId, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
            accepted: 0,
            rejected: 0,
            skipped: false,
        }
    }
}

/// Everything the presentation layer needs to describe a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output_path: Option<PathBuf>,
    pub sources: Vec<SourceReport>,
    pub segment_count: usize,
    /// Duration of the main content, before any tagline
    pub final_duration: f64,
    pub insufficient_content: bool,
    pub effective_analysis_mode: AnalysisMode,
    pub warnings: Vec<RunWarning>,
}

impl RunReport {
    pub fn new(run_id: RunId, mode: AnalysisMode) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            output_path: None,
            sources: Vec::new(),
            segment_count: 0,
            final_duration: 0.0,
            insufficient_content: false,
            effective_analysis_mode: mode,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, warning: RunWarning) {
        self.warnings.push(warning);
    }

    pub fn source_mut(&mut self, source: SourceId) -> Option<&mut SourceReport> {
        self.sources.iter_mut().find(|s| s.source == source)
    }

    /// Sources that were not skipped.
    pub fn usable_sources(&self) -> usize {
        self.sources.iter().filter(|s| !s.skipped).count()
    }

    pub fn finish(&mut self, output: impl Into<PathBuf>) {
        self.output_path = Some(output.into());
        self.finished_at = Some(Utc::now());
    }
}
