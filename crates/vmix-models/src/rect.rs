//! Frame geometry: normalized regions and pixel crop rectangles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A normalized rectangle (0.0 to 1.0) representing a relative region of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedRect {
    /// X coordinate of the top-left corner (0.0 = left, 1.0 = right)
    pub x: f64,
    /// Y coordinate of the top-left corner (0.0 = top, 1.0 = bottom)
    pub y: f64,
    /// Width of the rectangle (0.0 to 1.0)
    pub width: f64,
    /// Height of the rectangle (0.0 to 1.0)
    pub height: f64,
}

impl NormalizedRect {
    /// Create a new normalized rectangle.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// The whole frame.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Build from a pixel-space box inside a `frame_w`×`frame_h` frame.
    pub fn from_pixels(x: f64, y: f64, width: f64, height: f64, frame_w: u32, frame_h: u32) -> Self {
        let fw = frame_w.max(1) as f64;
        let fh = frame_h.max(1) as f64;
        Self::new(x / fw, y / fh, width / fw, height / fh).clamp_unit()
    }

    /// Check if the rectangle is valid (within 0.0-1.0 range).
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.001 // Allow small epsilon for float precision
            && self.y + self.height <= 1.001
    }

    #[inline]
    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.x + self.width / 2.0
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.y + self.height / 2.0
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Overlapping part of two rectangles, if any.
    pub fn intersection(&self, other: &NormalizedRect) -> Option<NormalizedRect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(NormalizedRect::new(x1, y1, x2 - x1, y2 - y1))
    }

    pub fn intersects(&self, other: &NormalizedRect) -> bool {
        self.intersection(other).is_some()
    }

    /// Intersection over union.
    pub fn iou(&self, other: &NormalizedRect) -> f64 {
        let Some(inter) = self.intersection(other) else {
            return 0.0;
        };
        let union = self.area() + other.area() - inter.area();
        if union > 0.0 {
            inter.area() / union
        } else {
            0.0
        }
    }

    /// Smallest rectangle containing both.
    pub fn union_with(&self, other: &NormalizedRect) -> NormalizedRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let x2 = self.x2().max(other.x2());
        let y2 = self.y2().max(other.y2());
        NormalizedRect::new(x, y, x2 - x, y2 - y)
    }

    /// Clip to the unit square.
    pub fn clamp_unit(&self) -> NormalizedRect {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let x2 = self.x2().clamp(0.0, 1.0);
        let y2 = self.y2().clamp(0.0, 1.0);
        NormalizedRect::new(x, y, (x2 - x).max(0.0), (y2 - y).max(0.0))
    }

    /// Convert to pixel coordinates of a `frame_w`×`frame_h` frame.
    pub fn to_pixels(&self, frame_w: u32, frame_h: u32) -> PixelRect {
        let r = self.clamp_unit();
        let fw = frame_w as f64;
        let fh = frame_h as f64;
        let x = (r.x * fw).floor() as u32;
        let y = (r.y * fh).floor() as u32;
        let x2 = ((r.x2() * fw).ceil() as u32).min(frame_w);
        let y2 = ((r.y2() * fh).ceil() as u32).min(frame_h);
        PixelRect::new(x, y, x2.saturating_sub(x), y2.saturating_sub(y))
    }
}

/// Merge overlapping rectangles until the set is pairwise disjoint.
///
/// Output order is by top, then left edge.
pub fn merge_overlapping(rects: &[NormalizedRect]) -> Vec<NormalizedRect> {
    let mut merged: Vec<NormalizedRect> = rects.iter().copied().filter(|r| r.area() > 0.0).collect();

    loop {
        let mut changed = false;
        let mut i = 0;
        while i < merged.len() {
            let mut j = i + 1;
            while j < merged.len() {
                if merged[i].intersects(&merged[j]) {
                    let other = merged.remove(j);
                    merged[i] = merged[i].union_with(&other);
                    changed = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        if !changed {
            break;
        }
    }

    merged.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    merged
}

/// Integer rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn x2(&self) -> u32 {
        self.x + self.width
    }

    pub fn y2(&self) -> u32 {
        self.y + self.height
    }

    /// Whether the rectangle lies fully inside a `frame_w`×`frame_h` frame.
    pub fn fits_within(&self, frame_w: u32, frame_h: u32) -> bool {
        self.width > 0 && self.height > 0 && self.x2() <= frame_w && self.y2() <= frame_h
    }

    /// Whether this rectangle covers the whole frame.
    pub fn is_full_frame(&self, frame_w: u32, frame_h: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == frame_w && self.height == frame_h
    }

    /// Overlap test against a normalized region of the same frame.
    pub fn intersects_region(&self, region: &NormalizedRect, frame_w: u32, frame_h: u32) -> bool {
        let fw = frame_w.max(1) as f64;
        let fh = frame_h.max(1) as f64;
        let own = NormalizedRect::new(
            self.x as f64 / fw,
            self.y as f64 / fh,
            self.width as f64 / fw,
            self.height as f64 / fh,
        );
        own.intersects(region)
    }
}
