//! Per-tile weight masks and full-canvas weight-field accumulation.

use ndarray::{Array2, Array4, ArrayView4, Axis};

use crate::grid::TileGrid;

/// Full-canvas `(1, 1, h, w)` tensor accumulating the sum of all tile
/// weight contributions; broadcastable against any NCHW canvas.
pub type WeightField = Array4<f32>;

/// Clamp floor applied before any division by a weight field, so
/// normalization never divides by zero. Small enough to sit below the
/// corner mass of a Gaussian tile mask, which is tiny but meaningful.
pub const WEIGHT_EPS: f32 = 1e-12;

/// Variance of the Gaussian tile mask, relative to tile size.
const GAUSSIAN_VAR: f32 = 0.01;

/// Uniform tile weighting: every location contributes equally.
#[must_use]
pub fn flat_mask(w: usize, h: usize) -> Array2<f32> {
    Array2::ones((h, w))
}

/// 2-D Gaussian tile weighting, peaked at the tile center and decaying
/// toward the edges. Separable: the outer product of two 1-D Gaussians
/// whose variance scales with that axis' length.
#[must_use]
pub fn gaussian_mask(w: usize, h: usize) -> Array2<f32> {
    let axis_probs = |len: usize| -> Vec<f32> {
        let midpoint = (len as f32 - 1.0) / 2.0;
        let denom = (len * len) as f32 * 2.0 * GAUSSIAN_VAR;
        let norm = (2.0 * std::f32::consts::PI * GAUSSIAN_VAR).sqrt();
        (0..len)
            .map(|i| {
                let d = i as f32 - midpoint;
                (-d * d / denom).exp() / norm
            })
            .collect()
    };

    let x_probs = axis_probs(w);
    let y_probs = axis_probs(h);
    Array2::from_shape_fn((h, w), |(y, x)| y_probs[y] * x_probs[x])
}

/// 1-D-separable feather mask: weight ramps linearly from 0 to 1 across
/// the first `overlap` cells of each axis, mirrors at the far edge, and is
/// flat 1 in the interior. The ramp is capped at half the tile so opposite
/// edges never cross.
#[must_use]
pub fn feather_mask(w: usize, h: usize, overlap: usize) -> Array2<f32> {
    let ramp = |len: usize| -> Vec<f32> {
        let mut weights = vec![1.0f32; len];
        let safe = overlap.min(len / 2);
        for i in 0..safe {
            let value = (i + 1) as f32 / (safe + 1) as f32;
            weights[i] = value;
            weights[len - 1 - i] = value;
        }
        weights
    };

    let x_ramp = ramp(w);
    let y_ramp = ramp(h);
    Array2::from_shape_fn((h, w), |(y, x)| y_ramp[y] * x_ramp[x])
}

/// View a `(h, w)` mask as `(1, 1, h, w)` so it broadcasts against an
/// NCHW canvas.
#[must_use]
pub fn broadcast_mask(mask: &Array2<f32>) -> ArrayView4<'_, f32> {
    mask.view().insert_axis(Axis(0)).insert_axis(Axis(0))
}

/// Sum each tile's mask into a zeroed full-canvas weight field. The result
/// is reused, unmodified, across all solver steps of one run.
#[must_use]
pub fn accumulate<F>(grid: &TileGrid, mask_fn: F) -> WeightField
where
    F: Fn(usize, usize) -> Array2<f32>,
{
    let mut field = Array4::zeros((1, 1, grid.canvas_h, grid.canvas_w));
    for bbox in grid {
        let mask = mask_fn(bbox.w, bbox.h);
        let mut region = bbox.view_mut(&mut field);
        region += &broadcast_mask(&mask);
    }
    clamp_weights(&mut field);
    field
}

/// Floor every location at [`WEIGHT_EPS`]. Zero-weight locations can only
/// arise from pathological geometries already rejected by the planner, so
/// they are clamped defensively rather than raised.
pub fn clamp_weights(field: &mut WeightField) {
    field.mapv_inplace(|w| w.max(WEIGHT_EPS));
}
