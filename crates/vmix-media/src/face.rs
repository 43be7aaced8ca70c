//! Reference-face matching.
//!
//! Matching is split into three capabilities so each can be swapped on its
//! own: a [`FaceDetector`] finds candidate boxes, a [`FaceEmbedder`] turns a
//! box into an appearance descriptor, and a [`FaceMatcher`] compares frames
//! against the run's [`FaceProfile`].
//!
//! The default implementations are heuristics with no model files: skin-tone
//! blobs on a coarse grid, and a small luma patch plus colour histogram.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;
use tracing::{debug, trace};

use vmix_models::{FaceEmbedding, FaceProfile, NormalizedRect};

use crate::error::{MediaError, MediaResult};
use crate::grid::{connected_components, CellGrid};

/// A face candidate in normalized frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFace {
    pub bbox: NormalizedRect,
    /// 0-1
    pub confidence: f64,
}

/// Result of matching one frame against the profile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaceMatch {
    /// `1 - distance` of the closest face under the threshold, else 0
    pub score: f64,
    /// Box of that face
    pub bbox: Option<NormalizedRect>,
}

impl FaceMatch {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Finds faces in a frame.
#[cfg_attr(test, mockall::automock)]
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<DetectedFace>>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Describes the appearance of a face box.
#[cfg_attr(test, mockall::automock)]
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, frame: &RgbImage, bbox: &NormalizedRect) -> MediaResult<FaceEmbedding>;
}

/// Scores a frame against a reference profile. Never fails: a frame that
/// cannot be analyzed scores zero.
pub trait FaceMatcher: Send + Sync {
    fn score(&self, frame: &RgbImage, profile: &FaceProfile) -> FaceMatch;
}

// =============================================================================
// Skin-tone detector
// =============================================================================

/// Skin-coloured blob detector.
///
/// Tiles the frame into a grid, marks cells whose pixels are mostly in the
/// YCbCr skin range, and keeps connected blobs with a face-like shape.
#[derive(Debug, Clone)]
pub struct SkinToneFaceDetector {
    /// Cells across the frame width
    pub grid_columns: u32,
    /// Share of skin pixels for a cell to count
    pub cell_skin_ratio: f64,
    /// Smallest blob, in cells
    pub min_cells: usize,
    /// Accepted height/width range of a blob (pixels)
    pub aspect_range: (f64, f64),
    /// Largest share of the frame a face may cover
    pub max_area: f64,
    /// Smallest share of its bounding box a blob must fill
    pub min_fill: f64,
}

impl Default for SkinToneFaceDetector {
    fn default() -> Self {
        Self {
            grid_columns: 32,
            cell_skin_ratio: 0.5,
            min_cells: 4,
            aspect_range: (0.7, 2.4),
            max_area: 0.9,
            min_fill: 0.45,
        }
    }
}

/// Chroma-only skin test (Chai & Ngan ranges).
fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

impl FaceDetector for SkinToneFaceDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<DetectedFace>> {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(MediaError::detection_failed("empty frame"));
        }

        let grid = CellGrid::new(w, h, (w / self.grid_columns.max(1)).max(2));
        let mut mask = vec![false; grid.len()];
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let (x0, y0, x1, y1) = grid.bounds(col, row);
                let mut skin = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        let p = frame.get_pixel(x, y).0;
                        if is_skin(p[0], p[1], p[2]) {
                            skin += 1;
                        }
                    }
                }
                let total = (x1 - x0) * (y1 - y0);
                mask[(row * grid.cols + col) as usize] =
                    total > 0 && skin as f64 / total as f64 >= self.cell_skin_ratio;
            }
        }

        let mut faces: Vec<DetectedFace> = connected_components(&mask, grid.cols, grid.rows)
            .into_iter()
            .filter(|blob| blob.cells >= self.min_cells && blob.fill() >= self.min_fill)
            .filter_map(|blob| {
                let bbox = grid.rect(blob.col0, blob.row0, blob.col1, blob.row1);
                let aspect = (bbox.height * h as f64) / (bbox.width * w as f64).max(1.0);
                let shaped = aspect >= self.aspect_range.0 && aspect <= self.aspect_range.1;
                (shaped && bbox.area() <= self.max_area).then(|| DetectedFace {
                    bbox,
                    confidence: blob.fill().min(1.0),
                })
            })
            .collect();

        faces.sort_by(|a, b| b.bbox.area().total_cmp(&a.bbox.area()));
        trace!(faces = faces.len(), "Skin-tone detection");
        Ok(faces)
    }

    fn name(&self) -> &'static str {
        "skin_tone"
    }
}

// =============================================================================
// Patch embedder
// =============================================================================

/// Side of the luma patch.
const PATCH_SIDE: u32 = 16;
/// Histogram bins per colour channel.
const HIST_BINS: usize = 4;
/// Weight of the histogram against the luma patch.
const HIST_WEIGHT: f32 = 0.5;

/// 16×16 mean-removed luma patch plus a 4×4×4 colour histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchEmbedder;

impl PatchEmbedder {
    pub fn new() -> Self {
        Self
    }
}

fn normalize_in_place(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

impl FaceEmbedder for PatchEmbedder {
    fn embed(&self, frame: &RgbImage, bbox: &NormalizedRect) -> MediaResult<FaceEmbedding> {
        let px = bbox.to_pixels(frame.width(), frame.height());
        if !px.fits_within(frame.width(), frame.height()) {
            return Err(MediaError::detection_failed(format!(
                "face box {:?} outside {}x{} frame",
                px,
                frame.width(),
                frame.height()
            )));
        }

        let crop = imageops::crop_imm(frame, px.x, px.y, px.width, px.height).to_image();
        let patch = imageops::resize(&crop, PATCH_SIDE, PATCH_SIDE, FilterType::Triangle);
        let gray = imageops::grayscale(&patch);

        let mut luma: Vec<f32> = gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        let mean = luma.iter().sum::<f32>() / luma.len() as f32;
        luma.iter_mut().for_each(|v| *v -= mean);
        normalize_in_place(&mut luma);

        let mut hist = vec![0f32; HIST_BINS * HIST_BINS * HIST_BINS];
        let bin = |v: u8| (v as usize * HIST_BINS) / 256;
        for p in crop.pixels() {
            let [r, g, b] = p.0;
            hist[(bin(r) * HIST_BINS + bin(g)) * HIST_BINS + bin(b)] += 1.0;
        }
        normalize_in_place(&mut hist);
        hist.iter_mut().for_each(|v| *v *= HIST_WEIGHT);

        luma.extend(hist);
        FaceEmbedding::from_raw(luma).ok_or_else(|| MediaError::detection_failed("degenerate face crop"))
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Detect, embed every face, keep the closest one under the threshold.
pub struct EmbeddingFaceMatcher {
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
}

impl EmbeddingFaceMatcher {
    pub fn new(detector: Box<dyn FaceDetector>, embedder: Box<dyn FaceEmbedder>) -> Self {
        Self { detector, embedder }
    }

    /// Skin-tone detector with the patch embedder.
    pub fn heuristic() -> Self {
        Self::new(Box::new(SkinToneFaceDetector::default()), Box::new(PatchEmbedder::new()))
    }

    pub fn detector(&self) -> &dyn FaceDetector {
        self.detector.as_ref()
    }

    pub fn embedder(&self) -> &dyn FaceEmbedder {
        self.embedder.as_ref()
    }
}

impl FaceMatcher for EmbeddingFaceMatcher {
    fn score(&self, frame: &RgbImage, profile: &FaceProfile) -> FaceMatch {
        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                debug!(detector = self.detector.name(), error = %e, "Face detection failed, scoring 0");
                return FaceMatch::none();
            }
        };

        let mut best = FaceMatch::none();
        for face in faces {
            let embedding = match self.embedder.embed(frame, &face.bbox) {
                Ok(embedding) => embedding,
                Err(e) => {
                    trace!(error = %e, "Skipping face that could not be embedded");
                    continue;
                }
            };
            let distance = embedding.normalized_distance(&profile.reference);
            if distance < profile.threshold && 1.0 - distance > best.score {
                best = FaceMatch {
                    score: 1.0 - distance,
                    bbox: Some(face.bbox),
                };
            }
        }
        best
    }
}

// =============================================================================
// Reference profile
// =============================================================================

/// Decode a reference photo.
pub fn load_reference_image(path: impl AsRef<Path>) -> MediaResult<RgbImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    Ok(image::open(path)?.to_rgb8())
}

/// Build a profile from the largest face in `image`.
///
/// Returns `Ok(None)` when no face is found.
pub fn build_face_profile(
    image: &RgbImage,
    detector: &dyn FaceDetector,
    embedder: &dyn FaceEmbedder,
    threshold: f64,
) -> MediaResult<Option<FaceProfile>> {
    let faces = detector.detect(image)?;
    let Some(largest) = faces
        .iter()
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
    else {
        return Ok(None);
    };

    let reference = embedder.embed(image, &largest.bbox)?;
    debug!(
        detector = detector.name(),
        faces = faces.len(),
        area = largest.bbox.area(),
        "Reference face selected"
    );
    Ok(Some(FaceProfile::new(reference, threshold)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use vmix_models::DEFAULT_FACE_THRESHOLD;

    const SKIN: Rgb<u8> = Rgb([224, 172, 140]);
    const BACKDROP: Rgb<u8> = Rgb([30, 60, 200]);

    /// Blue frame with a skin-coloured block and two darker "eyes".
    fn portrait(w: u32, h: u32, face: (u32, u32, u32, u32)) -> RgbImage {
        let (fx, fy, fw, fh) = face;
        let mut img = RgbImage::from_pixel(w, h, BACKDROP);
        for y in fy..fy + fh {
            for x in fx..fx + fw {
                img.put_pixel(x, y, SKIN);
            }
        }
        for (ex, ey) in [(fx + fw / 4, fy + fh / 3), (fx + 3 * fw / 4 - 4, fy + fh / 3)] {
            for y in ey..ey + 4 {
                for x in ex..ex + 4 {
                    img.put_pixel(x, y, Rgb([40, 30, 30]));
                }
            }
        }
        img
    }

    fn embedding(values: &[f32]) -> FaceEmbedding {
        FaceEmbedding::from_raw(values.to_vec()).unwrap()
    }

    #[test]
    fn test_skin_range() {
        assert!(is_skin(SKIN.0[0], SKIN.0[1], SKIN.0[2]));
        assert!(!is_skin(BACKDROP.0[0], BACKDROP.0[1], BACKDROP.0[2]));
        assert!(!is_skin(0, 0, 0));
    }

    #[test]
    fn test_detects_face_block() {
        let img = portrait(320, 240, (120, 60, 80, 120));
        let faces = SkinToneFaceDetector::default().detect(&img).unwrap();

        assert_eq!(faces.len(), 1);
        let bbox = faces[0].bbox;
        assert!((bbox.cx() - 0.5).abs() < 0.05, "cx = {}", bbox.cx());
        assert!((bbox.cy() - 0.5).abs() < 0.05, "cy = {}", bbox.cy());
    }

    #[test]
    fn test_no_face_on_plain_frame() {
        let img = RgbImage::from_pixel(320, 240, BACKDROP);
        assert!(SkinToneFaceDetector::default().detect(&img).unwrap().is_empty());
    }

    #[test]
    fn test_thin_strip_is_not_a_face() {
        let img = portrait(320, 240, (0, 100, 320, 30));
        assert!(SkinToneFaceDetector::default().detect(&img).unwrap().is_empty());
    }

    #[test]
    fn test_patch_embedding_is_unit_length_and_stable() {
        let img = portrait(320, 240, (120, 60, 80, 120));
        let bbox = NormalizedRect::new(0.375, 0.25, 0.25, 0.5);
        let a = PatchEmbedder.embed(&img, &bbox).unwrap();
        let b = PatchEmbedder.embed(&img, &bbox).unwrap();

        let norm: f32 = a.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert_eq!(a.normalized_distance(&b), 0.0);
    }

    #[test]
    fn test_same_face_matches_itself() {
        let img = portrait(320, 240, (120, 60, 80, 120));
        let matcher = EmbeddingFaceMatcher::heuristic();
        let profile = build_face_profile(&img, matcher.detector(), matcher.embedder(), DEFAULT_FACE_THRESHOLD)
            .unwrap()
            .unwrap();

        let m = matcher.score(&img, &profile);
        assert!(m.score > 0.99);
        assert!(m.bbox.is_some());

        let empty = RgbImage::from_pixel(320, 240, BACKDROP);
        assert_eq!(matcher.score(&empty, &profile), FaceMatch::none());
    }

    #[test]
    fn test_matcher_keeps_closest_face_under_threshold() {
        let near = NormalizedRect::new(0.1, 0.1, 0.2, 0.3);
        let far = NormalizedRect::new(0.6, 0.1, 0.2, 0.3);

        let mut detector = MockFaceDetector::new();
        detector.expect_detect().returning(move |_| {
            Ok(vec![
                DetectedFace { bbox: far, confidence: 0.9 },
                DetectedFace { bbox: near, confidence: 0.8 },
            ])
        });
        detector.expect_name().return_const("mock");

        let mut embedder = MockFaceEmbedder::new();
        embedder.expect_embed().returning(move |_, bbox| {
            if *bbox == near {
                Ok(embedding(&[1.0, 0.1]))
            } else {
                Ok(embedding(&[0.0, 1.0]))
            }
        });

        let matcher = EmbeddingFaceMatcher::new(Box::new(detector), Box::new(embedder));
        let profile = FaceProfile::new(embedding(&[1.0, 0.0]), DEFAULT_FACE_THRESHOLD);
        let m = matcher.score(&RgbImage::new(8, 8), &profile);

        assert_eq!(m.bbox, Some(near));
        assert!(m.score > 0.9 && m.score < 1.0);
    }

    #[test]
    fn test_detection_error_scores_zero() {
        let mut detector = MockFaceDetector::new();
        detector
            .expect_detect()
            .returning(|_| Err(MediaError::detection_failed("corrupt")));
        detector.expect_name().return_const("mock");
        let embedder = MockFaceEmbedder::new();

        let matcher = EmbeddingFaceMatcher::new(Box::new(detector), Box::new(embedder));
        let profile = FaceProfile::new(embedding(&[1.0]), DEFAULT_FACE_THRESHOLD);
        assert_eq!(matcher.score(&RgbImage::new(4, 4), &profile).score, 0.0);
    }

    #[test]
    fn test_profile_requires_a_face() {
        let img = RgbImage::from_pixel(64, 64, BACKDROP);
        let profile = build_face_profile(
            &img,
            &SkinToneFaceDetector::default(),
            &PatchEmbedder,
            DEFAULT_FACE_THRESHOLD,
        )
        .unwrap();
        assert!(profile.is_none());
    }
}
