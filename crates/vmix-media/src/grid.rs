//! Coarse cell grid shared by the heuristic detectors.

use vmix_models::NormalizedRect;

/// A frame tiled into square cells; edge cells may be partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CellGrid {
    pub cell: u32,
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
}

impl CellGrid {
    pub fn new(width: u32, height: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        Self {
            cell,
            cols: width.div_ceil(cell),
            rows: height.div_ceil(cell),
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    /// Pixel bounds `(x0, y0, x1, y1)` of a cell, exclusive at the far edge.
    pub fn bounds(&self, col: u32, row: u32) -> (u32, u32, u32, u32) {
        let x0 = col * self.cell;
        let y0 = row * self.cell;
        (
            x0,
            y0,
            (x0 + self.cell).min(self.width),
            (y0 + self.cell).min(self.height),
        )
    }

    /// Normalized box spanning the inclusive cell range.
    pub fn rect(&self, col0: u32, row0: u32, col1: u32, row1: u32) -> NormalizedRect {
        let (x0, y0, _, _) = self.bounds(col0, row0);
        let (_, _, x1, y1) = self.bounds(col1, row1);
        NormalizedRect::from_pixels(
            x0 as f64,
            y0 as f64,
            (x1 - x0) as f64,
            (y1 - y0) as f64,
            self.width,
            self.height,
        )
    }
}

/// Cell extent of one 4-connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Blob {
    pub col0: u32,
    pub row0: u32,
    pub col1: u32,
    pub row1: u32,
    pub cells: usize,
}

impl Blob {
    pub fn cols(&self) -> u32 {
        self.col1 - self.col0 + 1
    }

    pub fn rows(&self) -> u32 {
        self.row1 - self.row0 + 1
    }

    /// Share of the bounding box covered by member cells.
    pub fn fill(&self) -> f64 {
        self.cells as f64 / (self.cols() * self.rows()) as f64
    }
}

/// 4-connected components of the set cells in a row-major mask.
///
/// Components come out in scan order of their first cell.
pub(crate) fn connected_components(mask: &[bool], cols: u32, rows: u32) -> Vec<Blob> {
    let (cols, rows) = (cols as usize, rows as usize);
    let mut seen = vec![false; mask.len()];
    let mut blobs = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len().min(cols * rows) {
        if !mask[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        stack.push(start);

        let mut blob = Blob {
            col0: u32::MAX,
            row0: u32::MAX,
            col1: 0,
            row1: 0,
            cells: 0,
        };

        while let Some(idx) = stack.pop() {
            let (c, r) = (idx % cols, idx / cols);
            blob.col0 = blob.col0.min(c as u32);
            blob.row0 = blob.row0.min(r as u32);
            blob.col1 = blob.col1.max(c as u32);
            blob.row1 = blob.row1.max(r as u32);
            blob.cells += 1;

            let mut visit = |n: usize| {
                if mask[n] && !seen[n] {
                    seen[n] = true;
                    stack.push(n);
                }
            };
            if c > 0 {
                visit(idx - 1);
            }
            if c + 1 < cols {
                visit(idx + 1);
            }
            if r > 0 {
                visit(idx - cols);
            }
            if r + 1 < rows {
                visit(idx + cols);
            }
        }

        blobs.push(blob);
    }

    blobs
}
