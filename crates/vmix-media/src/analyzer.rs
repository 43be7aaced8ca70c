//! Turns one source video into scored candidate segments.
//!
//! The analyzer makes a single pass over a lazily decoded frame stream,
//! reduces every sampled frame to a handful of signals, and then scores
//! fixed-length windows from those signals. Decoded frames are dropped as
//! soon as their signals are known.

use futures::StreamExt;
use image::{GrayImage, RgbImage};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use vmix_models::{
    merge_overlapping, AnalysisMode, AnalysisParams, FaceProfile, MixConfig, NormalizedRect, ScoreWeights,
    ScoredSegment, Segment, SegmentEvidence, SegmentScore, SourceVideo, DURATION_EPSILON, NEUTRAL_FACE_SCORE,
};

use crate::error::{MediaError, MediaResult};
use crate::face::{FaceMatch, FaceMatcher};
use crate::frames::{FrameRequest, FrameSource};
use crate::signals::{luma_plane, FrameSignals, BLACK_LUMA, FLAT_SHARPNESS, FROZEN_MOTION};
use crate::text::{text_penalty, TextRegionDetector};

/// Run-wide analysis settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub weights: ScoreWeights,
    /// Length every window aims for
    pub clip_length: f64,
    /// Windows shorter than this after truncation are dropped
    pub min_clip_duration: f64,
    pub exclude_head: f64,
    pub exclude_tail: f64,
}

impl AnalyzerSettings {
    pub fn from_config(config: &MixConfig) -> Self {
        Self {
            weights: config.weights,
            clip_length: config.constraints().planned_clip_length(),
            min_clip_duration: config.min_clip_duration,
            exclude_head: config.exclude_head_seconds,
            exclude_tail: config.exclude_tail_seconds,
        }
    }
}

/// Candidate windows `[start, end)` of a source of length `duration`.
///
/// Every window is `clip_length` long except the last ones, which are cut at
/// the usable end. Lengths are fixed so equal windows can add up to the
/// target; the truncated tail windows are the only shorter candidates.
pub fn plan_windows(duration: f64, params: &AnalysisParams, settings: &AnalyzerSettings) -> Vec<(f64, f64)> {
    let usable_end = duration - settings.exclude_tail;
    let mut windows = Vec::new();

    for i in 0..params.max_windows {
        let start = settings.exclude_head + i as f64 * params.window_step;
        if start >= usable_end {
            break;
        }
        let end = (start + settings.clip_length).min(usable_end);
        if end - start + DURATION_EPSILON >= settings.min_clip_duration {
            windows.push((start, end));
        }
    }
    windows
}

/// Signals of one sampled frame.
#[derive(Debug, Clone)]
struct Sample {
    timestamp: f64,
    face: FaceMatch,
    text_regions: Vec<NormalizedRect>,
    text_penalty: f64,
    signals: FrameSignals,
}

/// Everything analysis learned about one source.
#[derive(Debug, Clone)]
pub struct SourceAnalysis {
    pub candidates: Vec<ScoredSegment>,
    /// Windows discarded as black or frozen
    pub rejected: usize,
    pub samples: usize,
    pub mode: AnalysisMode,
}

/// Scores windows of source videos.
pub struct ClipAnalyzer {
    frames: Arc<dyn FrameSource>,
    text: Arc<dyn TextRegionDetector>,
    face: Option<(Arc<dyn FaceMatcher>, Arc<FaceProfile>)>,
    settings: AnalyzerSettings,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl ClipAnalyzer {
    pub fn new(frames: Arc<dyn FrameSource>, text: Arc<dyn TextRegionDetector>, settings: AnalyzerSettings) -> Self {
        Self {
            frames,
            text,
            face: None,
            settings,
            cancel_rx: None,
        }
    }

    /// Score faces against `profile`. Without a profile every window gets the neutral face score.
    pub fn with_face_profile(mut self, matcher: Arc<dyn FaceMatcher>, profile: FaceProfile) -> Self {
        self.face = Some((matcher, Arc::new(profile)));
        self
    }

    /// Stop between frames once the flag flips.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Analyze one source at the given fidelity.
    pub async fn analyze(&self, video: &SourceVideo, mode: AnalysisMode) -> MediaResult<SourceAnalysis> {
        let params = mode.params();
        let windows = plan_windows(video.duration, &params, &self.settings);
        debug!(
            source = %video.id,
            mode = %mode,
            windows = windows.len(),
            clip_length = self.settings.clip_length,
            "Planned analysis windows"
        );

        let (Some(&(first, _)), Some(&(_, last))) = (windows.first(), windows.last()) else {
            info!(source = %video.id, duration = video.duration, "Source too short for any window");
            return Ok(SourceAnalysis {
                candidates: Vec::new(),
                rejected: 0,
                samples: 0,
                mode,
            });
        };

        let samples = self.sample(video, &params, first, last).await?;
        if samples.is_empty() {
            return Err(MediaError::frame_decode(format!("no frames decoded from {}", video.path.display())));
        }

        let mut candidates = Vec::with_capacity(windows.len());
        let mut rejected = 0;
        for (start, end) in windows {
            let Some(segment) = Segment::new(video.id, start, end) else {
                continue;
            };
            match self.score_window(segment, &samples) {
                Some(candidate) => candidates.push(candidate),
                None => rejected += 1,
            }
        }

        info!(
            source = %video.id,
            mode = %mode,
            samples = samples.len(),
            candidates = candidates.len(),
            rejected,
            "Source analyzed"
        );

        Ok(SourceAnalysis {
            candidates,
            rejected,
            samples: samples.len(),
            mode,
        })
    }

    async fn sample(&self, video: &SourceVideo, params: &AnalysisParams, start: f64, end: f64) -> MediaResult<Vec<Sample>> {
        let request = FrameRequest {
            start,
            end: Some(end),
            sample_fps: params.sample_fps,
            height: params.analysis_height,
        };
        let mut stream = self.frames.frames(video, &request).await?;

        let mut samples = Vec::new();
        let mut previous: Option<GrayImage> = None;
        while let Some(frame) = stream.next().await {
            if self.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
            let frame = frame?;

            let text = Arc::clone(&self.text);
            let face = self.face.clone();
            let prev = previous.take();
            let (sample, gray) = tokio::task::spawn_blocking(move || {
                measure_frame(frame.timestamp, &frame.image, prev.as_ref(), text.as_ref(), face.as_ref())
            })
            .await
            .map_err(|e| MediaError::internal(format!("frame analysis task failed: {e}")))?;

            previous = Some(gray);
            samples.push(sample);
        }
        Ok(samples)
    }

    /// Score one window, or `None` when it is not viable.
    fn score_window(&self, segment: Segment, samples: &[Sample]) -> Option<ScoredSegment> {
        let inside: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.timestamp + DURATION_EPSILON >= segment.start() && s.timestamp < segment.end())
            .collect();
        let window: Vec<&Sample> = if inside.is_empty() {
            let mid = (segment.start() + segment.end()) / 2.0;
            samples
                .iter()
                .min_by(|a, b| (a.timestamp - mid).abs().total_cmp(&(b.timestamp - mid).abs()))
                .into_iter()
                .collect()
        } else {
            inside
        };

        let n = window.len() as f64;
        let mean = |f: &dyn Fn(&Sample) -> f64| window.iter().map(|s| f(*s)).sum::<f64>() / n;

        if mean(&|s: &Sample| s.signals.luma) < BLACK_LUMA {
            return None;
        }
        let frozen = window.len() >= 2
            && window.iter().skip(1).all(|s| s.signals.motion.unwrap_or(0.0) < FROZEN_MOTION)
            && mean(&|s: &Sample| s.signals.sharpness) < FLAT_SHARPNESS;
        if frozen {
            return None;
        }

        let face_score = mean(&|s: &Sample| s.face.score);
        let penalty = mean(&|s: &Sample| s.text_penalty);
        let quality = mean(&|s: &Sample| s.signals.quality());

        let face_box = window
            .iter()
            .filter(|s| s.face.bbox.is_some())
            .max_by(|a, b| a.face.score.total_cmp(&b.face.score))
            .and_then(|s| s.face.bbox);
        let regions: Vec<NormalizedRect> = window.iter().flat_map(|s| s.text_regions.iter().copied()).collect();

        Some(ScoredSegment {
            segment,
            score: SegmentScore::compute(face_score, penalty, Some(quality), &self.settings.weights),
            evidence: SegmentEvidence {
                face_box,
                text_regions: merge_overlapping(&regions),
            },
        })
    }
}

fn measure_frame(
    timestamp: f64,
    image: &RgbImage,
    previous: Option<&GrayImage>,
    text: &dyn TextRegionDetector,
    face: Option<&(Arc<dyn FaceMatcher>, Arc<FaceProfile>)>,
) -> (Sample, GrayImage) {
    let gray = luma_plane(image);
    let signals = FrameSignals::measure(&gray, previous);
    let text_regions = text.detect(image);
    let face = match face {
        Some((matcher, profile)) => matcher.score(image, profile),
        None => FaceMatch {
            score: NEUTRAL_FACE_SCORE,
            bbox: None,
        },
    };

    let sample = Sample {
        timestamp,
        face,
        text_penalty: text_penalty(&text_regions),
        text_regions,
        signals,
    };
    (sample, gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::GeneratedFrameSource;
    use crate::text::{EdgeDensityTextDetector, MockTextRegionDetector};
    use image::Rgb;
    use std::path::PathBuf;
    use vmix_models::{FaceEmbedding, SourceId};

    fn video(duration: f64) -> SourceVideo {
        SourceVideo {
            id: SourceId(0),
            path: PathBuf::from("generated.mp4"),
            duration,
            width: 640,
            height: 360,
            fps: 30.0,
            has_audio: false,
        }
    }

    fn settings(clip_length: f64, min: f64) -> AnalyzerSettings {
        AnalyzerSettings {
            weights: ScoreWeights::default(),
            clip_length,
            min_clip_duration: min,
            exclude_head: 0.0,
            exclude_tail: 0.0,
        }
    }

    /// Busy, moving footage.
    fn lively(_: &SourceVideo, t: f64, w: u32, h: u32) -> MediaResult<RgbImage> {
        let shift = (t * 7.0) as u32;
        Ok(RgbImage::from_fn(w, h, |x, y| {
            let v = ((x + shift) * 13 + y * 7) % 200 + 30;
            Rgb([v as u8, (v / 2) as u8, 90])
        }))
    }

    fn no_text() -> Arc<dyn TextRegionDetector> {
        let mut text = MockTextRegionDetector::new();
        text.expect_detect().returning(|_| Vec::new());
        text.expect_name().return_const("none");
        Arc::new(text)
    }

    #[test]
    fn test_window_length_is_fixed_until_the_tail() {
        let params = AnalysisMode::Precise.params();
        let windows = plan_windows(20.0, &params, &settings(4.0, 2.0));

        let (full, tail): (Vec<_>, Vec<_>) = windows.iter().partition(|(s, e)| (e - s - 4.0).abs() < 1e-9);
        assert!(!full.is_empty());
        assert!(tail.iter().all(|&&(_, end)| end == 20.0));
        assert!(tail.iter().all(|&&(s, e)| e - s >= 2.0 && e - s < 4.0));
    }

    #[test]
    fn test_plan_windows_truncates_and_drops() {
        let params = AnalysisMode::Fast.params();
        let windows = plan_windows(60.0, &params, &settings(10.0 / 3.0, 2.0));

        assert_eq!(windows.len(), 20);
        assert_eq!(windows[0].0, 0.0);
        assert_eq!(windows.last().copied(), Some((57.0, 60.0)));

        // 58.5 s: the window at 57 s keeps only 1.5 s and is dropped
        let windows = plan_windows(58.5, &params, &settings(10.0 / 3.0, 2.0));
        assert_eq!(windows.last().unwrap().0, 54.0);
    }

    #[test]
    fn test_plan_windows_short_source_and_exclusions() {
        let params = AnalysisMode::Fast.params();
        assert_eq!(plan_windows(4.0, &params, &settings(5.0, 3.0)), vec![(0.0, 4.0)]);
        assert!(plan_windows(2.0, &params, &settings(5.0, 3.0)).is_empty());

        let s = AnalyzerSettings {
            exclude_head: 5.0,
            exclude_tail: 5.0,
            ..settings(4.0, 2.0)
        };
        let windows = plan_windows(30.0, &params, &s);
        assert_eq!(windows.first().unwrap().0, 5.0);
        assert!(windows.iter().all(|&(_, end)| end <= 25.0));
    }

    #[test]
    fn test_plan_windows_caps_count() {
        let params = AnalysisMode::Fast.params();
        let windows = plan_windows(600.0, &params, &settings(5.0, 3.0));
        assert_eq!(windows.len(), params.max_windows);
    }

    #[tokio::test]
    async fn test_neutral_scores_without_profile() {
        let analyzer = ClipAnalyzer::new(
            Arc::new(GeneratedFrameSource::new(lively)),
            no_text(),
            settings(5.0, 3.0),
        );
        let result = analyzer.analyze(&video(20.0), AnalysisMode::Fast).await.unwrap();

        assert_eq!(result.candidates.len(), 6);
        assert_eq!(result.rejected, 0);
        for c in &result.candidates {
            assert!((c.score.face_score - NEUTRAL_FACE_SCORE).abs() < 1e-9);
            assert!((c.score() - NEUTRAL_FACE_SCORE).abs() < 1e-9);
            assert!(c.evidence.face_box.is_none());
        }
    }

    #[tokio::test]
    async fn test_black_and_frozen_windows_are_rejected() {
        // Black for the first 6 s, frozen flat grey afterwards
        let source = GeneratedFrameSource::new(|_: &SourceVideo, t: f64, w: u32, h: u32| {
            let v = if t < 6.0 { 0 } else { 120 };
            Ok(RgbImage::from_pixel(w, h, Rgb([v, v, v])))
        });
        let analyzer = ClipAnalyzer::new(Arc::new(source), no_text(), settings(3.0, 3.0));
        let result = analyzer.analyze(&video(12.0), AnalysisMode::Fast).await.unwrap();

        assert!(result.candidates.is_empty());
        assert_eq!(result.rejected, 4);
    }

    #[tokio::test]
    async fn test_text_lowers_score_and_is_kept_as_evidence() {
        let region = NormalizedRect::new(0.0, 0.0, 1.0, 0.2);
        let mut text = MockTextRegionDetector::new();
        text.expect_detect().returning(move |_| vec![region]);
        text.expect_name().return_const("mock");

        let analyzer = ClipAnalyzer::new(Arc::new(GeneratedFrameSource::new(lively)), Arc::new(text), settings(5.0, 3.0));
        let result = analyzer.analyze(&video(10.0), AnalysisMode::Fast).await.unwrap();

        let c = &result.candidates[0];
        assert!((c.score.text_penalty - 0.2).abs() < 1e-9);
        assert!((c.score() - 0.3).abs() < 1e-9);
        assert_eq!(c.evidence.text_regions, vec![region]);
    }

    #[tokio::test]
    async fn test_face_profile_drives_score() {
        struct FixedMatcher;
        impl FaceMatcher for FixedMatcher {
            fn score(&self, _: &RgbImage, _: &FaceProfile) -> FaceMatch {
                FaceMatch {
                    score: 0.9,
                    bbox: Some(NormalizedRect::new(0.6, 0.2, 0.2, 0.3)),
                }
            }
        }

        let profile = FaceProfile::new(FaceEmbedding::from_raw(vec![1.0]).unwrap(), 0.4);
        let analyzer = ClipAnalyzer::new(Arc::new(GeneratedFrameSource::new(lively)), no_text(), settings(5.0, 3.0))
            .with_face_profile(Arc::new(FixedMatcher), profile);
        let result = analyzer.analyze(&video(10.0), AnalysisMode::Fast).await.unwrap();

        let c = &result.candidates[0];
        assert!((c.score() - 0.9).abs() < 1e-9);
        assert_eq!(c.evidence.face_box.map(|b| b.x), Some(0.6));
    }

    #[tokio::test]
    async fn test_real_text_detector_runs_in_pipeline() {
        let analyzer = ClipAnalyzer::new(
            Arc::new(GeneratedFrameSource::new(lively)),
            Arc::new(EdgeDensityTextDetector::default()),
            settings(5.0, 3.0),
        );
        let result = analyzer.analyze(&video(10.0), AnalysisMode::Precise).await.unwrap();
        assert!(!result.candidates.is_empty());
        assert_eq!(result.mode, AnalysisMode::Precise);
    }

    #[tokio::test]
    async fn test_cancelled_analysis() {
        let (tx, rx) = watch::channel(true);
        let analyzer = ClipAnalyzer::new(Arc::new(GeneratedFrameSource::new(lively)), no_text(), settings(5.0, 3.0))
            .with_cancel(rx);
        let err = analyzer.analyze(&video(10.0), AnalysisMode::Fast).await.unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
        drop(tx);
    }

    #[tokio::test]
    async fn test_source_too_short() {
        let analyzer = ClipAnalyzer::new(Arc::new(GeneratedFrameSource::new(lively)), no_text(), settings(5.0, 3.0));
        let result = analyzer.analyze(&video(2.0), AnalysisMode::Fast).await.unwrap();
        assert!(result.candidates.is_empty());
        assert_eq!(result.samples, 0);
    }
}
