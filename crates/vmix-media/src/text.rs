//! Burned-in text detection.
//!
//! Glyph strokes are short, high-contrast horizontal transitions packed into
//! wide lines. The default detector looks for exactly that on a coarse cell
//! grid, plus the bright band subtitles leave near the bottom of the frame.

use image::{GrayImage, RgbImage};
use rayon::prelude::*;

use vmix_models::{merge_overlapping, NormalizedRect};

use crate::grid::{connected_components, CellGrid};
use crate::signals::luma_plane;

/// Finds regions likely to hold text or graphics.
///
/// Implementations are deterministic per frame and hold no state between calls.
#[cfg_attr(test, mockall::automock)]
pub trait TextRegionDetector: Send + Sync {
    /// Disjoint regions in normalized frame coordinates.
    fn detect(&self, frame: &RgbImage) -> Vec<NormalizedRect>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Gradient-density text detector.
#[derive(Debug, Clone)]
pub struct EdgeDensityTextDetector {
    /// Cells across the frame width
    pub grid_columns: u32,
    /// Luma step between neighbours that counts as an edge
    pub edge_threshold: u8,
    /// Edge density range of a text cell
    pub density_range: (f64, f64),
    /// Minimum max-min luma inside a text cell
    pub min_contrast: u8,
    /// Minimum run of adjacent text cells on one row
    pub min_run: u32,
    /// Bottom share of the frame searched for subtitles
    pub subtitle_band: f64,
    /// Luma above which a pixel counts as subtitle white
    pub subtitle_luma: u8,
    /// Share of white pixels that flags a subtitle row band
    pub subtitle_ratio: f64,
}

impl Default for EdgeDensityTextDetector {
    fn default() -> Self {
        Self {
            grid_columns: 40,
            edge_threshold: 40,
            density_range: (0.12, 0.6),
            min_contrast: 80,
            min_run: 3,
            subtitle_band: 0.3,
            subtitle_luma: 200,
            subtitle_ratio: 0.01,
        }
    }
}

impl EdgeDensityTextDetector {
    fn is_text_cell(&self, gray: &GrayImage, bounds: (u32, u32, u32, u32)) -> bool {
        let (x0, y0, x1, y1) = bounds;
        if x1 - x0 < 2 || y1 == y0 {
            return false;
        }

        let mut edges = 0u32;
        let mut lo = u8::MAX;
        let mut hi = u8::MIN;
        for y in y0..y1 {
            let mut prev = gray.get_pixel(x0, y).0[0];
            lo = lo.min(prev);
            hi = hi.max(prev);
            for x in x0 + 1..x1 {
                let v = gray.get_pixel(x, y).0[0];
                if v.abs_diff(prev) >= self.edge_threshold {
                    edges += 1;
                }
                lo = lo.min(v);
                hi = hi.max(v);
                prev = v;
            }
        }

        let density = edges as f64 / ((x1 - x0 - 1) * (y1 - y0)) as f64;
        hi - lo >= self.min_contrast && density >= self.density_range.0 && density <= self.density_range.1
    }

    /// Line-shaped clusters of text cells.
    fn text_lines(&self, gray: &GrayImage) -> Vec<NormalizedRect> {
        let (w, h) = gray.dimensions();
        let grid = CellGrid::new(w, h, (w / self.grid_columns.max(1)).max(4));

        let cells: Vec<bool> = (0..grid.rows)
            .into_par_iter()
            .flat_map_iter(|row| {
                (0..grid.cols).map(move |col| self.is_text_cell(gray, grid.bounds(col, row)))
            })
            .collect();

        // Keep only runs wide enough to be a line of text
        let mut lines = vec![false; cells.len()];
        for row in 0..grid.rows {
            let base = (row * grid.cols) as usize;
            let mut col = 0;
            while col < grid.cols {
                if !cells[base + col as usize] {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < grid.cols && cells[base + col as usize] {
                    col += 1;
                }
                if col - start >= self.min_run {
                    lines[base + start as usize..base + col as usize].fill(true);
                }
            }
        }

        connected_components(&lines, grid.cols, grid.rows)
            .into_iter()
            .map(|blob| grid.rect(blob.col0, blob.row0, blob.col1, blob.row1))
            .collect()
    }

    /// Rows near the bottom with enough near-white pixels, as one band.
    fn subtitle_band(&self, gray: &GrayImage) -> Option<NormalizedRect> {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        let band_start = ((1.0 - self.subtitle_band) * h as f64).floor() as u32;

        let flagged: Vec<u32> = (band_start..h)
            .filter(|&y| {
                let white = (0..w)
                    .filter(|&x| gray.get_pixel(x, y).0[0] > self.subtitle_luma)
                    .count();
                white as f64 / w as f64 > self.subtitle_ratio
            })
            .collect();

        let (first, last) = (*flagged.first()?, *flagged.last()?);
        let xs: Vec<u32> = (0..w)
            .filter(|&x| (first..=last).any(|y| gray.get_pixel(x, y).0[0] > self.subtitle_luma))
            .collect();
        let (x0, x1) = (*xs.first()?, *xs.last()?);

        Some(NormalizedRect::from_pixels(
            x0 as f64,
            first as f64,
            (x1 - x0 + 1) as f64,
            (last - first + 1) as f64,
            w,
            h,
        ))
    }
}

impl TextRegionDetector for EdgeDensityTextDetector {
    fn detect(&self, frame: &RgbImage) -> Vec<NormalizedRect> {
        let gray = luma_plane(frame);
        if gray.width() < 8 || gray.height() < 8 {
            return Vec::new();
        }

        let mut regions = self.text_lines(&gray);
        regions.extend(self.subtitle_band(&gray));
        merge_overlapping(&regions)
    }

    fn name(&self) -> &'static str {
        "edge_density"
    }
}

/// Resolution of the coverage grid used by [`text_penalty`].
const COVERAGE_GRID: usize = 100;

/// Share of the frame covered by the union of `regions`, in `[0, 1]`.
pub fn text_penalty(regions: &[NormalizedRect]) -> f64 {
    if regions.is_empty() {
        return 0.0;
    }

    let n = COVERAGE_GRID;
    let mut covered = vec![false; n * n];
    for r in regions.iter().map(NormalizedRect::clamp_unit) {
        let x0 = (r.x * n as f64).floor() as usize;
        let y0 = (r.y * n as f64).floor() as usize;
        let x1 = ((r.x2() * n as f64).ceil() as usize).min(n);
        let y1 = ((r.y2() * n as f64).ceil() as usize).min(n);
        for y in y0..y1 {
            covered[y * n + x0..y * n + x1].fill(true);
        }
    }

    let count = covered.iter().filter(|&&c| c).count();
    (count as f64 / (n * n) as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Mid-grey frame with vertical 2px black/white stripes where the
    /// caption sits, which reads as dense glyph edges.
    fn captioned(w: u32, h: u32, caption: (u32, u32, u32, u32)) -> RgbImage {
        let (cx, cy, cw, ch) = caption;
        RgbImage::from_fn(w, h, |x, y| {
            let inside = x >= cx && x < cx + cw && y >= cy && y < cy + ch;
            if inside {
                if (x / 2) % 2 == 0 {
                    Rgb([10, 10, 10])
                } else {
                    Rgb([190, 190, 190])
                }
            } else {
                Rgb([100, 110, 120])
            }
        })
    }

    #[test]
    fn test_plain_frame_has_no_text() {
        let frame = RgbImage::from_pixel(320, 180, Rgb([100, 110, 120]));
        assert!(EdgeDensityTextDetector::default().detect(&frame).is_empty());
    }

    #[test]
    fn test_finds_central_caption() {
        let frame = captioned(320, 180, (96, 80, 128, 24));
        let regions = EdgeDensityTextDetector::default().detect(&frame);

        assert_eq!(regions.len(), 1);
        let r = regions[0];
        assert!((r.cx() - 0.5).abs() < 0.05, "cx = {}", r.cx());
        assert!(r.width > 0.3 && r.width < 0.5);
        assert!(r.y >= 0.4 && r.y2() <= 0.62);
    }

    #[test]
    fn test_narrow_texture_is_not_a_line() {
        // Two cells wide: below the run length
        let frame = captioned(320, 180, (160, 80, 16, 24));
        assert!(EdgeDensityTextDetector::default().detect(&frame).is_empty());
    }

    #[test]
    fn test_subtitle_band() {
        let mut frame = RgbImage::from_pixel(320, 180, Rgb([40, 40, 40]));
        for y in 160..168 {
            for x in 100..220 {
                if x % 3 != 0 {
                    frame.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        let regions = EdgeDensityTextDetector::default().detect(&frame);
        assert!(!regions.is_empty());
        let bottom = regions.last().unwrap();
        assert!(bottom.y > 0.85);
        assert!((bottom.cx() - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let frame = captioned(320, 180, (40, 20, 200, 30));
        let detector = EdgeDensityTextDetector::default();
        assert_eq!(detector.detect(&frame), detector.detect(&frame));
    }

    #[test]
    fn test_penalty_counts_overlap_once() {
        let a = NormalizedRect::new(0.0, 0.0, 0.5, 0.5);
        assert!((text_penalty(&[a]) - 0.25).abs() < 1e-9);
        assert!((text_penalty(&[a, a]) - 0.25).abs() < 1e-9);

        let b = NormalizedRect::new(0.25, 0.0, 0.5, 0.5);
        assert!((text_penalty(&[a, b]) - 0.375).abs() < 1e-9);
        assert_eq!(text_penalty(&[NormalizedRect::full()]), 1.0);
        assert_eq!(text_penalty(&[]), 0.0);
    }
}
