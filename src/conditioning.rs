//! Conditioning carried alongside the canvas into each prediction call.
//!
//! Conditioning is an immutable value type: every transform returns a new
//! structure, so tiles can never observe each other's mutations and no
//! defensive deep copies are needed.

use std::collections::HashMap;

use ndarray::{concatenate, s, Array3, Array4, Axis};

use crate::grid::BBox;
use crate::Canvas;

/// Conditioning for one sampling run: an optional sequence embedding, an
/// optional canvas-aligned spatial mask (regional prompting), and free-form
/// metadata.
#[derive(Debug, Clone, Default)]
pub struct Conditioning {
    /// Sequence embedding `(batch, tokens, dim)`. Carries no spatial
    /// extent, so it is broadcast to tile batches rather than cropped.
    pub embedding: Option<Array3<f32>>,

    /// Canvas-aligned `(1, 1, h, w)` region mask. Cropped consistently
    /// with every canvas crop.
    pub spatial_mask: Option<Array4<f32>>,

    /// Free-form metadata, cloned as-is.
    pub metadata: HashMap<String, String>,
}

impl Conditioning {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Array3<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_spatial_mask(mut self, mask: Array4<f32>) -> Self {
        self.spatial_mask = Some(mask);
        self
    }

    /// Conditioning for a single tile: the spatial mask is cropped to the
    /// box, everything without spatial extent is carried over unchanged.
    #[must_use]
    pub fn crop(&self, bbox: &BBox) -> Self {
        Self {
            embedding: self.embedding.clone(),
            spatial_mask: self.spatial_mask.as_ref().map(|m| bbox.crop(m)),
            metadata: self.metadata.clone(),
        }
    }

    /// The same conditioning with its spatial mask cyclically shifted,
    /// matching a canvas shifted by the same `(dy, dx)`.
    #[must_use]
    pub fn rolled(&self, dy: isize, dx: isize) -> Self {
        Self {
            embedding: self.embedding.clone(),
            spatial_mask: self.spatial_mask.as_ref().map(|m| roll4(m, dy, dx)),
            metadata: self.metadata.clone(),
        }
    }

    /// Conditioning for one batched prediction call over `bboxes`, where
    /// each tile contributes `batch` entries (tile-major order, matching
    /// the concatenated tile batch). The embedding is batch-repeated; the
    /// spatial mask is cropped per tile and stacked.
    #[must_use]
    pub fn for_tiles(&self, bboxes: &[BBox], batch: usize) -> Self {
        let total = bboxes.len() * batch;
        Self {
            embedding: self
                .embedding
                .as_ref()
                .map(|e| repeat_to_batch(e, total)),
            spatial_mask: self.spatial_mask.as_ref().map(|m| {
                let crops: Vec<Array4<f32>> = bboxes.iter().map(|b| b.crop(m)).collect();
                let mut views = Vec::with_capacity(total);
                for crop in &crops {
                    for _ in 0..batch {
                        views.push(crop.view());
                    }
                }
                concatenate(Axis(0), &views).expect("tile crops share one shape")
            }),
            metadata: self.metadata.clone(),
        }
    }
}

/// Repeat or truncate the leading axis to exactly `batch` rows.
fn repeat_to_batch(tensor: &Array3<f32>, batch: usize) -> Array3<f32> {
    let rows = tensor.dim().0;
    if rows == batch {
        return tensor.clone();
    }
    if rows > batch {
        return tensor.slice(s![..batch, .., ..]).to_owned();
    }
    let reps = batch.div_ceil(rows);
    let views: Vec<_> = std::iter::repeat_n(tensor.view(), reps).collect();
    let stacked = concatenate(Axis(0), &views).expect("repeats share one shape");
    stacked.slice(s![..batch, .., ..]).to_owned()
}

/// Cyclic 2-D shift over the spatial axes of an NCHW tensor, with
/// wraparound. `roll4(t, dy, dx)` moves content down by `dy` rows and
/// right by `dx` columns; negative offsets invert it exactly.
#[must_use]
pub(crate) fn roll4(tensor: &Canvas, dy: isize, dx: isize) -> Canvas {
    let (_, _, h, w) = tensor.dim();
    if (dy, dx) == (0, 0) {
        return tensor.clone();
    }
    let (hi, wi) = (h as isize, w as isize);
    Array4::from_shape_fn(tensor.dim(), |(n, c, y, x)| {
        let sy = (y as isize - dy).rem_euclid(hi) as usize;
        let sx = (x as isize - dx).rem_euclid(wi) as usize;
        tensor[[n, c, sy, sx]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_slices_mask_and_keeps_embedding() {
        let mask = Array4::from_shape_fn((1, 1, 8, 8), |(_, _, y, x)| (y * 8 + x) as f32);
        let cond = Conditioning::new()
            .with_embedding(Array3::zeros((1, 4, 16)))
            .with_spatial_mask(mask);
        let cropped = cond.crop(&BBox::new(2, 4, 4, 4));
        let m = cropped.spatial_mask.unwrap();
        assert_eq!(m.dim(), (1, 1, 4, 4));
        assert_eq!(m[[0, 0, 0, 0]], (4 * 8 + 2) as f32);
        assert_eq!(cropped.embedding.unwrap().dim(), (1, 4, 16));
    }

    #[test]
    fn for_tiles_repeats_embedding_and_stacks_masks() {
        let cond = Conditioning::new()
            .with_embedding(Array3::ones((1, 3, 4)))
            .with_spatial_mask(Array4::ones((1, 1, 8, 8)));
        let bboxes = [BBox::new(0, 0, 4, 4), BBox::new(4, 4, 4, 4)];
        let tiled = cond.for_tiles(&bboxes, 2);
        assert_eq!(tiled.embedding.unwrap().dim(), (4, 3, 4));
        assert_eq!(tiled.spatial_mask.unwrap().dim(), (4, 1, 4, 4));
    }

    #[test]
    fn repeat_truncates_oversized_batch() {
        let t = Array3::from_shape_fn((3, 2, 2), |(b, _, _)| b as f32);
        let r = repeat_to_batch(&t, 2);
        assert_eq!(r.dim().0, 2);
        assert_eq!(r[[1, 0, 0]], 1.0);
    }

    #[test]
    fn roll_round_trips_exactly() {
        let t = Array4::from_shape_fn((1, 2, 5, 7), |(n, c, y, x)| {
            (n * 1000 + c * 100 + y * 10 + x) as f32
        });
        for &(dy, dx) in &[(0isize, 0isize), (1, 3), (4, 6), (2, 0)] {
            let back = roll4(&roll4(&t, dy, dx), -dy, -dx);
            assert_eq!(back, t);
        }
    }

    #[test]
    fn roll_moves_content_with_wraparound() {
        let mut t = Array4::<f32>::zeros((1, 1, 4, 4));
        t[[0, 0, 0, 0]] = 1.0;
        let rolled = roll4(&t, 1, 2);
        assert_eq!(rolled[[0, 0, 1, 2]], 1.0);
        let wrapped = roll4(&t, -1, -1);
        assert_eq!(wrapped[[0, 0, 3, 3]], 1.0);
    }
}
