//! Mapping segments onto the vertical output frame.
//!
//! [`plan_crop`] decides once per segment where the output window sits in
//! the source, using the face and text evidence gathered during analysis.
//! The decision is then realized either by FFmpeg ([`segment_filter_chain`])
//! or in memory ([`transform_frame`]).

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::trace;

use vmix_models::{
    CropDecision, NormalizedRect, OutputSpec, PixelRect, ResamplingFilter, SegmentEvidence, SourceVideo,
    TextAction, TextHandlingMode,
};

use crate::filters::{filter_crop, filter_delogo, filter_fit_and_pad, filter_normalize_stream, filter_scale};

/// Sources this close to the output aspect are scaled without cropping.
pub const ASPECT_TOLERANCE: f64 = 0.1;

/// Crop scales tried when steering around text, largest first.
const CROP_SCALES: [f64; 6] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5];

/// Fills text regions before scaling.
pub trait InpaintFilter: Send + Sync {
    /// FFmpeg filters, in source pixels, that fill `regions`.
    fn ffmpeg_filters(&self, regions: &[NormalizedRect], frame_w: u32, frame_h: u32) -> Vec<String>;

    /// Fill `regions` of `image` in place.
    fn fill(&self, image: &mut RgbImage, regions: &[NormalizedRect]);

    fn name(&self) -> &'static str;
}

/// Neighbourhood fill: FFmpeg `delogo` when rendering, the average of each
/// region's border ring in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelogoInpaint;

impl InpaintFilter for DelogoInpaint {
    fn ffmpeg_filters(&self, regions: &[NormalizedRect], frame_w: u32, frame_h: u32) -> Vec<String> {
        regions
            .iter()
            .filter_map(|r| filter_delogo(&r.to_pixels(frame_w, frame_h), frame_w, frame_h))
            .collect()
    }

    fn fill(&self, image: &mut RgbImage, regions: &[NormalizedRect]) {
        for region in regions {
            fill_border_average(image, &region.to_pixels(image.width(), image.height()));
        }
    }

    fn name(&self) -> &'static str {
        "delogo"
    }
}

/// Paint `rect` with the mean colour of the one-pixel ring around it.
pub fn fill_border_average(image: &mut RgbImage, rect: &PixelRect) {
    let (w, h) = image.dimensions();
    if !rect.fits_within(w, h) {
        return;
    }

    let x0 = rect.x.saturating_sub(1);
    let y0 = rect.y.saturating_sub(1);
    let x1 = rect.x2().min(w - 1);
    let y1 = rect.y2().min(h - 1);

    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let inside = x >= rect.x && x < rect.x2() && y >= rect.y && y < rect.y2();
            if inside {
                continue;
            }
            let p = image.get_pixel(x, y).0;
            for c in 0..3 {
                sum[c] += p[c] as u64;
            }
            count += 1;
        }
    }
    if count == 0 {
        return;
    }

    let fill = Rgb([
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    ]);
    for y in rect.y..rect.y2() {
        for x in rect.x..rect.x2() {
            image.put_pixel(x, y, fill);
        }
    }
}

// =============================================================================
// Crop planning
// =============================================================================

fn even(v: f64) -> u32 {
    ((v.round() as u32) & !1).max(2)
}

/// Largest output-aspect rectangle that fits the source, or the whole frame
/// when the source is already close to the output aspect.
fn base_crop_size(frame_w: u32, frame_h: u32, aspect: f64) -> (u32, u32) {
    let source_aspect = frame_w as f64 / frame_h.max(1) as f64;
    if (source_aspect - aspect).abs() <= ASPECT_TOLERANCE {
        return (frame_w, frame_h);
    }
    if source_aspect > aspect {
        (even(frame_h as f64 * aspect).min(frame_w), frame_h)
    } else {
        (frame_w, even(frame_w as f64 / aspect).min(frame_h))
    }
}

/// Offset placing a span of `size` centred on `center`, kept inside `len`.
fn place(size: u32, len: u32, center: f64) -> u32 {
    let max = len.saturating_sub(size) as f64;
    (center - size as f64 / 2.0).round().clamp(0.0, max) as u32
}

fn overlaps(a0: u32, a1: u32, b0: u32, b1: u32) -> bool {
    a0 < b1 && b0 < a1
}

fn avoids_all(rect: &PixelRect, blocked: &[PixelRect]) -> bool {
    blocked
        .iter()
        .all(|b| !overlaps(rect.x, rect.x2(), b.x, b.x2()) || !overlaps(rect.y, rect.y2(), b.y, b.y2()))
}

/// Offsets worth trying along one axis: the preferred one and the spots
/// flush against each blocked interval.
fn axis_candidates(size: u32, len: u32, preferred: u32, blocked: impl Iterator<Item = (u32, u32)>) -> Vec<u32> {
    let max = len.saturating_sub(size);
    let mut out = vec![preferred];
    for (b0, b1) in blocked {
        if b1 <= max {
            out.push(b1);
        }
        if let Some(left) = b0.checked_sub(size) {
            out.push(left.min(max));
        }
    }
    out.dedup();
    out
}

/// Nearest text-free window to the preferred centre, shrinking if needed.
fn steer_around_text(
    frame_w: u32,
    frame_h: u32,
    base: (u32, u32),
    center: (f64, f64),
    blocked: &[PixelRect],
) -> Option<PixelRect> {
    for scale in CROP_SCALES {
        let cw = even(base.0 as f64 * scale).min(frame_w);
        let ch = even(base.1 as f64 * scale).min(frame_h);
        let px = place(cw, frame_w, center.0);
        let py = place(ch, frame_h, center.1);

        let xs = axis_candidates(cw, frame_w, px, blocked.iter().map(|b| (b.x, b.x2())));
        let ys = axis_candidates(ch, frame_h, py, blocked.iter().map(|b| (b.y, b.y2())));

        let mut best: Option<(f64, PixelRect)> = None;
        for &y in &ys {
            for &x in &xs {
                let rect = PixelRect::new(x, y, cw, ch);
                if !avoids_all(&rect, blocked) {
                    continue;
                }
                let dx = x as f64 + cw as f64 / 2.0 - center.0;
                let dy = y as f64 + ch as f64 / 2.0 - center.1;
                let dist = dx * dx + dy * dy;
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, rect));
                }
            }
        }

        if let Some((_, rect)) = best {
            trace!(scale, ?rect, "Crop steered around text");
            return Some(rect);
        }
    }
    None
}

/// Decide how a segment reaches the output frame.
///
/// The crop centres on the best face when there is one, else on the frame.
/// In `crop` mode the window moves (and shrinks down to half size) to keep
/// clear of text, falling back to letterboxing. In `inpaint` mode the text
/// inside the crop is filled instead.
pub fn plan_crop(
    frame_w: u32,
    frame_h: u32,
    evidence: &SegmentEvidence,
    mode: TextHandlingMode,
    output_aspect: f64,
) -> (CropDecision, TextAction) {
    let base = base_crop_size(frame_w, frame_h, output_aspect);
    let center = evidence
        .face_box
        .map(|f| (f.cx() * frame_w as f64, f.cy() * frame_h as f64))
        .unwrap_or((frame_w as f64 / 2.0, frame_h as f64 / 2.0));
    let preferred = PixelRect::new(
        place(base.0, frame_w, center.0),
        place(base.1, frame_h, center.1),
        base.0,
        base.1,
    );

    let regions = &evidence.text_regions;
    match mode {
        TextHandlingMode::Avoid => (CropDecision::Crop { rect: preferred }, TextAction::None),
        TextHandlingMode::Crop => {
            let blocked: Vec<PixelRect> = regions.iter().map(|r| r.to_pixels(frame_w, frame_h)).collect();
            if avoids_all(&preferred, &blocked) {
                return (CropDecision::Crop { rect: preferred }, TextAction::None);
            }
            match steer_around_text(frame_w, frame_h, base, center, &blocked) {
                Some(rect) => (CropDecision::Crop { rect }, TextAction::Cropped),
                None => (CropDecision::Letterbox, TextAction::None),
            }
        }
        TextHandlingMode::Inpaint => {
            let inside: Vec<NormalizedRect> = regions
                .iter()
                .copied()
                .filter(|r| preferred.intersects_region(r, frame_w, frame_h))
                .collect();
            let action = if inside.is_empty() {
                TextAction::None
            } else {
                TextAction::Inpaint { regions: inside }
            };
            (CropDecision::Crop { rect: preferred }, action)
        }
    }
}

// =============================================================================
// Realization
// =============================================================================

/// FFmpeg `-vf` chain rendering one segment of `video` at the output size.
pub fn segment_filter_chain(
    video: &SourceVideo,
    crop: &CropDecision,
    text_action: &TextAction,
    spec: &OutputSpec,
    inpaint: &dyn InpaintFilter,
) -> String {
    let mut filters = Vec::new();
    if let TextAction::Inpaint { regions } = text_action {
        filters.extend(inpaint.ffmpeg_filters(regions, video.width, video.height));
    }
    match crop {
        CropDecision::Crop { rect } => {
            if !rect.is_full_frame(video.width, video.height) {
                filters.push(filter_crop(rect));
            }
            filters.push(filter_scale(spec.width, spec.height, spec.resampling));
        }
        CropDecision::Letterbox => filters.push(filter_fit_and_pad(spec.width, spec.height, spec.resampling)),
    }
    filters.push(filter_normalize_stream(spec.fps));
    filters.join(",")
}

fn resize_filter(resampling: ResamplingFilter) -> FilterType {
    match resampling {
        ResamplingFilter::Standard => FilterType::CatmullRom,
        ResamplingFilter::HighQuality => FilterType::Lanczos3,
    }
}

/// In-memory counterpart of [`segment_filter_chain`] for a single frame.
///
/// A frame already at the output size with a full-frame crop and nothing to
/// fill comes back unchanged.
pub fn transform_frame(
    frame: &RgbImage,
    crop: &CropDecision,
    text_action: &TextAction,
    spec: &OutputSpec,
    inpaint: &dyn InpaintFilter,
) -> RgbImage {
    let (w, h) = frame.dimensions();
    let needs_fill = matches!(text_action, TextAction::Inpaint { regions } if !regions.is_empty());
    let full_frame = matches!(crop, CropDecision::Crop { rect } if rect.is_full_frame(w, h));
    if (w, h) == (spec.width, spec.height) && full_frame && !needs_fill {
        return frame.clone();
    }

    let mut source = frame.clone();
    if let TextAction::Inpaint { regions } = text_action {
        inpaint.fill(&mut source, regions);
    }

    let filter = resize_filter(spec.resampling);
    match crop {
        CropDecision::Crop { rect } if rect.fits_within(w, h) => {
            let cropped = imageops::crop_imm(&source, rect.x, rect.y, rect.width, rect.height).to_image();
            if cropped.dimensions() == (spec.width, spec.height) {
                cropped
            } else {
                imageops::resize(&cropped, spec.width, spec.height, filter)
            }
        }
        _ => letterbox(&source, spec, filter),
    }
}

fn letterbox(source: &RgbImage, spec: &OutputSpec, filter: FilterType) -> RgbImage {
    let (w, h) = source.dimensions();
    let scale = (spec.width as f64 / w.max(1) as f64).min(spec.height as f64 / h.max(1) as f64);
    let fit_w = ((w as f64 * scale).round() as u32).clamp(1, spec.width);
    let fit_h = ((h as f64 * scale).round() as u32).clamp(1, spec.height);

    let fitted = imageops::resize(source, fit_w, fit_h, filter);
    let mut canvas = RgbImage::from_pixel(spec.width, spec.height, Rgb([0, 0, 0]));
    imageops::replace(
        &mut canvas,
        &fitted,
        ((spec.width - fit_w) / 2) as i64,
        ((spec.height - fit_h) / 2) as i64,
    );
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vmix_models::SourceId;

    const VERTICAL: f64 = 9.0 / 16.0;

    fn evidence(face: Option<NormalizedRect>, text: Vec<NormalizedRect>) -> SegmentEvidence {
        SegmentEvidence {
            face_box: face,
            text_regions: text,
        }
    }

    fn small_spec() -> OutputSpec {
        OutputSpec {
            width: 90,
            height: 160,
            fps: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_landscape_center_crop() {
        let (crop, action) = plan_crop(1920, 1080, &evidence(None, vec![]), TextHandlingMode::Avoid, VERTICAL);
        assert_eq!(crop, CropDecision::Crop { rect: PixelRect::new(656, 0, 608, 1080) });
        assert_eq!(action, TextAction::None);
    }

    #[test]
    fn test_smart_crop_follows_face_and_clamps() {
        let face = NormalizedRect::new(0.9, 0.3, 0.08, 0.2);
        let (crop, _) = plan_crop(1920, 1080, &evidence(Some(face), vec![]), TextHandlingMode::Avoid, VERTICAL);
        let CropDecision::Crop { rect } = crop else {
            panic!("expected a crop");
        };
        assert_eq!(rect.x2(), 1920);
        assert!(rect.fits_within(1920, 1080));
    }

    #[test]
    fn test_near_vertical_source_is_only_scaled() {
        let (crop, _) = plan_crop(1080, 1800, &evidence(None, vec![]), TextHandlingMode::Avoid, VERTICAL);
        assert_eq!(crop, CropDecision::Crop { rect: PixelRect::new(0, 0, 1080, 1800) });
    }

    #[test]
    fn test_crop_mode_shifts_away_from_central_text() {
        let text = NormalizedRect::new(0.375, 0.25, 0.25, 0.5);
        let (crop, action) = plan_crop(1920, 1080, &evidence(None, vec![text]), TextHandlingMode::Crop, VERTICAL);

        let CropDecision::Crop { rect } = crop else {
            panic!("crop mode should steer, not letterbox");
        };
        assert_eq!(action, TextAction::Cropped);
        assert_ne!(rect.x, 656, "crop should leave the centre");
        assert!(!rect.intersects_region(&text, 1920, 1080));
        assert_eq!((rect.width, rect.height), (608, 1080));
    }

    #[test]
    fn test_crop_mode_shrinks_before_giving_up() {
        // A full-height band in the middle plus both sides blocked at the top
        let texts = vec![
            NormalizedRect::new(0.25, 0.0, 0.5, 1.0),
            NormalizedRect::new(0.0, 0.0, 0.25, 0.125),
            NormalizedRect::new(0.75, 0.0, 0.25, 0.125),
        ];
        let (crop, action) = plan_crop(1920, 1080, &evidence(None, texts.clone()), TextHandlingMode::Crop, VERTICAL);
        let CropDecision::Crop { rect } = crop else {
            panic!("a smaller crop fits below the side captions");
        };
        assert_eq!(action, TextAction::Cropped);
        assert!(rect.height < 1080);
        assert!(texts.iter().all(|t| !rect.intersects_region(t, 1920, 1080)));
    }

    #[test]
    fn test_crop_mode_letterboxes_when_text_everywhere() {
        let (crop, action) = plan_crop(
            1920,
            1080,
            &evidence(None, vec![NormalizedRect::new(0.0, 0.3, 1.0, 0.4)]),
            TextHandlingMode::Crop,
            VERTICAL,
        );
        assert_eq!(crop, CropDecision::Letterbox);
        assert_eq!(action, TextAction::None);
    }

    #[test]
    fn test_inpaint_mode_keeps_crop_and_lists_regions() {
        let inside = NormalizedRect::new(0.45, 0.8, 0.1, 0.1);
        let outside = NormalizedRect::new(0.0, 0.0, 0.1, 0.1);
        let (crop, action) = plan_crop(
            1920,
            1080,
            &evidence(None, vec![outside, inside]),
            TextHandlingMode::Inpaint,
            VERTICAL,
        );
        assert_eq!(crop, CropDecision::Crop { rect: PixelRect::new(656, 0, 608, 1080) });
        assert_eq!(action, TextAction::Inpaint { regions: vec![inside] });
    }

    #[test]
    fn test_filter_chain() {
        let video = SourceVideo {
            id: SourceId(0),
            path: PathBuf::from("a.mp4"),
            duration: 10.0,
            width: 1920,
            height: 1080,
            fps: 25.0,
            has_audio: true,
        };
        let spec = OutputSpec::default();
        let action = TextAction::Inpaint {
            regions: vec![NormalizedRect::new(0.375, 0.75, 0.25, 0.125)],
        };
        let chain = segment_filter_chain(
            &video,
            &CropDecision::Crop { rect: PixelRect::new(656, 0, 608, 1080) },
            &action,
            &spec,
            &DelogoInpaint,
        );
        assert_eq!(
            chain,
            "delogo=x=720:y=810:w=480:h=135,crop=608:1080:656:0,scale=1080:1920:flags=bicubic,fps=30,setsar=1,format=yuv420p"
        );

        let letterbox = segment_filter_chain(&video, &CropDecision::Letterbox, &TextAction::None, &spec, &DelogoInpaint);
        assert!(letterbox.starts_with("scale=1080:1920:force_original_aspect_ratio=decrease"));
    }

    #[test]
    fn test_transform_is_idempotent_on_normalized_frames() {
        let spec = small_spec();
        let frame = RgbImage::from_fn(360, 202, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let (crop, action) = plan_crop(360, 202, &evidence(None, vec![]), TextHandlingMode::Avoid, spec.aspect());
        let once = transform_frame(&frame, &crop, &action, &spec, &DelogoInpaint);
        assert_eq!(once.dimensions(), (90, 160));

        let (crop, action) = plan_crop(90, 160, &evidence(None, vec![]), TextHandlingMode::Avoid, spec.aspect());
        let twice = transform_frame(&once, &crop, &action, &spec, &DelogoInpaint);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_letterbox_pads_with_black() {
        let spec = small_spec();
        let frame = RgbImage::from_pixel(320, 180, Rgb([200, 200, 200]));
        let out = transform_frame(&frame, &CropDecision::Letterbox, &TextAction::None, &spec, &DelogoInpaint);
        assert_eq!(out.dimensions(), (90, 160));
        assert_eq!(out.get_pixel(45, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(45, 80).0, [200, 200, 200]);
    }

    #[test]
    fn test_border_average_fill() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([50, 100, 150]));
        for y in 3..6 {
            for x in 3..6 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        fill_border_average(&mut img, &PixelRect::new(3, 3, 3, 3));
        assert_eq!(img.get_pixel(4, 4).0, [50, 100, 150]);
    }
}
