//! Deterministic tile grid planning under divisibility constraints.

use crate::error::{Error, Result};
use crate::grid::{BBox, COMPRESSION_FACTOR};

/// An ordered set of tile bounding boxes covering a canvas, together with
/// the resolved tile geometry it was planned from.
///
/// Invariants: the union of all boxes covers `[0, w) x [0, h)` with no
/// gaps, every box lies fully inside the canvas, and adjacent tiles share
/// at least `overlap` units wherever the axis needs more than one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    pub canvas_w: usize,
    pub canvas_h: usize,
    pub tile_w: usize,
    pub tile_h: usize,
    pub overlap: usize,
    pub x_slices: usize,
    pub y_slices: usize,
    bboxes: Vec<BBox>,
}

impl TileGrid {
    /// Number of tiles in the grid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    /// True when the whole canvas fits in one tile.
    #[must_use]
    pub fn is_single_tile(&self) -> bool {
        self.bboxes.len() == 1
    }

    #[must_use]
    pub fn bboxes(&self) -> &[BBox] {
        &self.bboxes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BBox> {
        self.bboxes.iter()
    }

    /// True when `canvas` height/width match the geometry this grid was
    /// planned for.
    #[must_use]
    pub fn matches(&self, height: usize, width: usize) -> bool {
        self.canvas_h == height && self.canvas_w == width
    }

    /// The same grid in a coordinate system `factor` times finer. Used to
    /// derive the pixel-space grid from the latent-space one; a mismatch
    /// between the two produces doubled seams, so both must come from a
    /// single plan.
    #[must_use]
    pub fn scaled(&self, factor: usize) -> Self {
        Self {
            canvas_w: self.canvas_w * factor,
            canvas_h: self.canvas_h * factor,
            tile_w: self.tile_w * factor,
            tile_h: self.tile_h * factor,
            overlap: self.overlap * factor,
            x_slices: self.x_slices,
            y_slices: self.y_slices,
            bboxes: self.bboxes.iter().map(|b| b.scaled(factor)).collect(),
        }
    }

    /// One-line description, e.g. `3x2 (6) 448x432 ovlp 64`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}x{} ({}) {}x{} ovlp {}",
            self.x_slices,
            self.y_slices,
            self.len(),
            self.tile_w,
            self.tile_h,
            self.overlap
        )
    }
}

impl<'a> IntoIterator for &'a TileGrid {
    type Item = &'a BBox;
    type IntoIter = std::slice::Iter<'a, BBox>;

    fn into_iter(self) -> Self::IntoIter {
        self.bboxes.iter()
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

fn round_up_to_factor(v: usize) -> usize {
    ceil_div(v, COMPRESSION_FACTOR) * COMPRESSION_FACTOR
}

/// Slices needed to cover `dim` with `tile`-sized tiles sharing `overlap`:
/// one tile covers the start, more are added until the remainder is covered.
fn slices_for(dim: usize, tile: usize, overlap: usize) -> usize {
    if tile >= dim || tile <= overlap {
        1
    } else {
        1 + ceil_div(dim - tile, tile - overlap)
    }
}

/// Tile size that makes `slices` tiles with `overlap` exactly cover `dim`.
fn ideal_tile(dim: usize, slices: usize, overlap: usize) -> usize {
    if slices == 1 {
        dim
    } else {
        ceil_div(dim + (slices - 1) * overlap, slices)
    }
}

/// Plan a tile grid for a `canvas_w` x `canvas_h` canvas under a maximum
/// tile size and requested overlap, all in the same coordinate units.
///
/// Tile sizes are rounded up to multiples of [`COMPRESSION_FACTOR`] (then
/// clamped back to the canvas on axes a single tile spans), and slice
/// counts re-derived from the rounded values. Tiles are placed with a
/// uniform stride per axis; the last row/column is clamped so it never runs
/// past the canvas edge.
///
/// # Errors
///
/// Returns [`Error::InvalidGeometry`] when either canvas dimension is 0,
/// when `max_tile` is below the compression factor, or when
/// `overlap >= max_tile` (an overlap that consumes the whole tile cannot
/// produce a usable grid and is rejected rather than silently clamped).
pub fn plan(canvas_w: usize, canvas_h: usize, max_tile: usize, overlap: usize) -> Result<TileGrid> {
    if canvas_w == 0 || canvas_h == 0 {
        return Err(Error::geometry(format!(
            "canvas {canvas_w}x{canvas_h} has a zero dimension"
        )));
    }
    if max_tile < COMPRESSION_FACTOR {
        return Err(Error::geometry(format!(
            "max tile size {max_tile} is below the compression factor {COMPRESSION_FACTOR}"
        )));
    }
    if overlap >= max_tile {
        return Err(Error::geometry(format!(
            "overlap {overlap} consumes the whole tile (max tile size {max_tile})"
        )));
    }

    // Never allow overlap to reach the tile interior's edge.
    let overlap = overlap.min(max_tile - COMPRESSION_FACTOR);

    let tile_w = canvas_w.min(max_tile);
    let tile_h = canvas_h.min(max_tile);
    let x_slices = slices_for(canvas_w, tile_w, overlap);
    let y_slices = slices_for(canvas_h, tile_h, overlap);

    // Recompute the tile size that exactly tiles each axis with the chosen
    // slice count, round up to the compression factor, then re-derive the
    // slice counts once more (rounding can change how many tiles fit).
    let tile_w = round_up_to_factor(ideal_tile(canvas_w, x_slices, overlap)).min(canvas_w);
    let tile_h = round_up_to_factor(ideal_tile(canvas_h, y_slices, overlap)).min(canvas_h);
    // Rounding the overlap up can let it swallow the rounded tile on a
    // short axis, which would collapse that axis to one non-spanning tile
    // and leave cells uncovered. Cap it back below the smallest tile that
    // still has to advance.
    let mut overlap = round_up_to_factor(overlap);
    if tile_w < canvas_w && overlap >= tile_w {
        overlap = tile_w - COMPRESSION_FACTOR;
    }
    if tile_h < canvas_h && overlap >= tile_h {
        overlap = tile_h - COMPRESSION_FACTOR;
    }
    let x_slices = slices_for(canvas_w, tile_w, overlap);
    let y_slices = slices_for(canvas_h, tile_h, overlap);

    let step_x = tile_w.saturating_sub(overlap);
    let step_y = tile_h.saturating_sub(overlap);

    let mut bboxes = Vec::with_capacity(x_slices * y_slices);
    for row in 0..y_slices {
        let y = (row * step_y).min(canvas_h - tile_h);
        for col in 0..x_slices {
            let x = (col * step_x).min(canvas_w - tile_w);
            bboxes.push(BBox::new(x, y, tile_w, tile_h));
        }
    }

    let grid = TileGrid {
        canvas_w,
        canvas_h,
        tile_w,
        tile_h,
        overlap,
        x_slices,
        y_slices,
        bboxes,
    };
    tracing::debug!("planned tile grid {}", grid.summary());
    Ok(grid)
}
