//! Cheap per-frame image signals used for viability and quality.
//!
//! All signals are normalized to `[0, 1]` and computed on the luma plane.

use image::{GrayImage, RgbImage};

/// Mean luma below which a window counts as black (16/255, video black level).
pub const BLACK_LUMA: f64 = 16.0 / 255.0;

/// Motion below which consecutive samples count as identical.
pub const FROZEN_MOTION: f64 = 0.002;

/// Sharpness below which a frame counts as flat.
pub const FLAT_SHARPNESS: f64 = 0.01;

/// Mean absolute Laplacian that maps to a sharpness of 1.0.
const SHARPNESS_SCALE: f64 = 32.0;

/// Luma plane of an RGB frame (BT.601 weights).
pub fn luma_plane(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

/// Mean brightness.
pub fn mean_luma(gray: &GrayImage) -> f64 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    sum as f64 / pixels.len() as f64 / 255.0
}

/// Mean absolute 4-neighbour Laplacian, scaled so ordinary footage lands
/// well inside the range and flat frames sit near zero.
pub fn sharpness(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as i32;
    let mut total: u64 = 0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = 4 * px(x, y) - px(x - 1, y) - px(x + 1, y) - px(x, y - 1) - px(x, y + 1);
            total += lap.unsigned_abs() as u64;
        }
    }

    let count = ((w - 2) * (h - 2)) as f64;
    (total as f64 / count / SHARPNESS_SCALE).min(1.0)
}

/// Mean absolute luma difference between two samples.
///
/// Frames of different sizes are treated as a hard cut.
pub fn motion(previous: &GrayImage, current: &GrayImage) -> f64 {
    if previous.dimensions() != current.dimensions() {
        return 1.0;
    }
    let a = previous.as_raw();
    let b = current.as_raw();
    if a.is_empty() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&p, &q)| (p as i32 - q as i32).unsigned_abs() as u64)
        .sum();
    total as f64 / a.len() as f64 / 255.0
}

/// Signals of one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSignals {
    pub luma: f64,
    pub sharpness: f64,
    /// Difference to the previous sample; `None` for the first sample of a pass
    pub motion: Option<f64>,
}

impl FrameSignals {
    /// Measure `gray`, diffing against the previous sample when given.
    pub fn measure(gray: &GrayImage, previous: Option<&GrayImage>) -> Self {
        Self {
            luma: mean_luma(gray),
            sharpness: sharpness(gray),
            motion: previous.map(|p| motion(p, gray)),
        }
    }

    /// Quality blend used for `motion_or_sharpness`.
    pub fn quality(&self) -> f64 {
        (0.5 * self.sharpness + 0.5 * self.motion.unwrap_or(0.0)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn checkerboard(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 255 }]))
    }

    #[test]
    fn test_black_frame_luma() {
        let black = RgbImage::from_pixel(64, 36, Rgb([0, 0, 0]));
        assert!(mean_luma(&luma_plane(&black)) < BLACK_LUMA);

        let grey = RgbImage::from_pixel(64, 36, Rgb([128, 128, 128]));
        assert!((mean_luma(&luma_plane(&grey)) - 128.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_sharpness_separates_flat_from_detailed() {
        let flat = GrayImage::from_pixel(32, 32, Luma([90]));
        assert!(sharpness(&flat) < FLAT_SHARPNESS);
        assert_eq!(sharpness(&checkerboard(32, 32)), 1.0);
    }

    #[test]
    fn test_motion() {
        let a = GrayImage::from_pixel(16, 16, Luma([10]));
        let b = GrayImage::from_pixel(16, 16, Luma([61]));
        assert_eq!(motion(&a, &a), 0.0);
        assert!((motion(&a, &b) - 0.2).abs() < 1e-9);
        assert_eq!(motion(&a, &GrayImage::new(8, 8)), 1.0);
    }

    #[test]
    fn test_quality_blend() {
        let signals = FrameSignals {
            luma: 0.5,
            sharpness: 0.4,
            motion: Some(0.2),
        };
        assert!((signals.quality() - 0.3).abs() < 1e-9);
    }
}
