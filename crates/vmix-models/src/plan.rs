//! The single-use assembly plan handed from selection to rendering.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::rect::{NormalizedRect, PixelRect};
use crate::segment::{Segment, SourceId};

/// How a segment's frames reach the output aspect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CropDecision {
    /// Crop this source-pixel rectangle, then scale to the output size
    Crop { rect: PixelRect },
    /// Fit the whole frame inside the output and pad the rest
    Letterbox,
}

/// What happens to detected text in a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextAction {
    /// Nothing to do
    #[default]
    None,
    /// The crop rectangle already excludes every region
    Cropped,
    /// Fill these regions before scaling
    Inpaint { regions: Vec<NormalizedRect> },
}

/// One clip of the output, in play order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanEntry {
    pub segment: Segment,
    pub crop: CropDecision,
    pub text_action: TextAction,
}

/// Ordered clips to render. Consumed by value by the assembly engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssemblyPlan {
    entries: Vec<PlanEntry>,
}

impl AssemblyPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of segment durations.
    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.segment.duration()).sum()
    }

    /// Source of every entry, in order.
    pub fn source_sequence(&self) -> Vec<SourceId> {
        self.entries.iter().map(|e| e.segment.source()).collect()
    }

    /// Number of neighbouring entries that share a source.
    pub fn adjacent_repeats(&self) -> usize {
        self.entries
            .windows(2)
            .filter(|w| w[0].segment.source() == w[1].segment.source())
            .count()
    }
}
