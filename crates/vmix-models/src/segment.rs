//! Source videos and the scored candidate segments cut from them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::rect::NormalizedRect;

/// Index of a source video in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SourceId(pub usize);

impl SourceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// A probed input video. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceVideo {
    pub id: SourceId,
    pub path: PathBuf,
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

impl SourceVideo {
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// A time range of one source video.
///
/// Boundaries are fixed at construction; scores live beside the segment in
/// [`ScoredSegment`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    source: SourceId,
    start: f64,
    end: f64,
}

impl Segment {
    /// Returns `None` unless `0 <= start < end`.
    pub fn new(source: SourceId, start: f64, end: f64) -> Option<Self> {
        if start.is_finite() && end.is_finite() && start >= 0.0 && end > start {
            Some(Self { source, start, end })
        } else {
            None
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True when both segments come from the same source and share footage.
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.source == other.source && self.start < other.end && other.start < self.end
    }

    /// Whether `t` falls inside `[start, end)`.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:.2}s..{:.2}s]", self.source, self.start, self.end)
    }
}

/// Quality signals attached to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentScore {
    /// 0-1, strength of the reference-face match
    pub face_score: f64,
    /// 0-1, fraction of frame area flagged as text
    pub text_penalty: f64,
    /// 0-1, blend of sharpness and motion when measured
    pub motion_or_sharpness: Option<f64>,
    /// Weighted composite clipped to 0-1
    pub score: f64,
}

/// Weights of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreWeights {
    pub face: f64,
    pub text: f64,
    pub quality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            face: 1.0,
            text: 1.0,
            quality: 0.0,
        }
    }
}

impl SegmentScore {
    /// `face × wf − text × wt (+ quality × wq)`, clipped to `[0, 1]`.
    pub fn compute(
        face_score: f64,
        text_penalty: f64,
        motion_or_sharpness: Option<f64>,
        weights: &ScoreWeights,
    ) -> Self {
        let face_score = face_score.clamp(0.0, 1.0);
        let text_penalty = text_penalty.clamp(0.0, 1.0);
        let quality = motion_or_sharpness.map(|q| q.clamp(0.0, 1.0));

        let raw = face_score * weights.face - text_penalty * weights.text
            + quality.unwrap_or(0.0) * weights.quality;

        Self {
            face_score,
            text_penalty,
            motion_or_sharpness: quality,
            score: if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 },
        }
    }
}

/// Where things were seen inside a segment, in normalized frame coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentEvidence {
    /// Best-matching face across the segment's samples
    pub face_box: Option<NormalizedRect>,
    /// Disjoint text regions seen in any sample
    pub text_regions: Vec<NormalizedRect>,
}

/// A candidate produced by analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredSegment {
    pub segment: Segment,
    pub score: SegmentScore,
    pub evidence: SegmentEvidence,
}

impl ScoredSegment {
    pub fn source(&self) -> SourceId {
        self.segment.source()
    }

    pub fn duration(&self) -> f64 {
        self.segment.duration()
    }

    pub fn score(&self) -> f64 {
        self.score.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_rejects_bad_bounds() {
        assert!(Segment::new(SourceId(0), 5.0, 5.0).is_none());
        assert!(Segment::new(SourceId(0), -1.0, 2.0).is_none());
        assert!(Segment::new(SourceId(0), 1.0, f64::NAN).is_none());

        let seg = Segment::new(SourceId(2), 1.5, 4.0).unwrap();
        assert!((seg.duration() - 2.5).abs() < 1e-9);
        assert_eq!(seg.to_string(), "source-2[1.50s..4.00s]");
    }

    #[test]
    fn test_overlap_is_per_source() {
        let a = Segment::new(SourceId(0), 0.0, 3.0).unwrap();
        let b = Segment::new(SourceId(0), 2.9, 6.0).unwrap();
        let c = Segment::new(SourceId(0), 3.0, 6.0).unwrap();
        let d = Segment::new(SourceId(1), 0.0, 3.0).unwrap();

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!a.overlaps(&d));
    }

    #[test]
    fn test_composite_score_is_clipped() {
        let weights = ScoreWeights::default();

        let s = SegmentScore::compute(0.5, 0.0, None, &weights);
        assert!((s.score - 0.5).abs() < 1e-9);

        let s = SegmentScore::compute(0.2, 0.6, Some(0.9), &weights);
        assert_eq!(s.score, 0.0);

        let heavy = ScoreWeights { face: 3.0, ..weights };
        let s = SegmentScore::compute(0.9, 0.1, None, &heavy);
        assert_eq!(s.score, 1.0);
    }
}
