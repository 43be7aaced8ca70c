//! Reference face profile.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default similarity threshold on normalized embedding distance.
pub const DEFAULT_FACE_THRESHOLD: f64 = 0.4;

/// Face score used for every segment when no profile is supplied.
pub const NEUTRAL_FACE_SCORE: f64 = 0.5;

/// L2-normalized appearance descriptor of one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FaceEmbedding(Vec<f32>);

impl FaceEmbedding {
    /// Normalize `values` to unit length. Returns `None` for an all-zero vector.
    pub fn from_raw(values: Vec<f32>) -> Option<Self> {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return None;
        }
        Some(Self(values.into_iter().map(|v| v / norm).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance between unit vectors scaled to `[0, 1]`.
    ///
    /// Embeddings of different lengths are maximally distant.
    pub fn normalized_distance(&self, other: &FaceEmbedding) -> f64 {
        if self.0.len() != other.0.len() {
            return 1.0;
        }
        let sq: f32 = self
            .0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        (f64::from(sq.sqrt()) / 2.0).clamp(0.0, 1.0)
    }
}

/// Reference embedding plus the distance a match must stay under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FaceProfile {
    pub reference: FaceEmbedding,
    pub threshold: f64,
}

impl FaceProfile {
    pub fn new(reference: FaceEmbedding, threshold: f64) -> Self {
        Self { reference, threshold }
    }
}
