//! Mixture of Diffusers: Gaussian tile weights, per-tile rescale applied
//! before summation.

use ndarray::Array2;

use crate::cancel::CancelToken;
use crate::conditioning::Conditioning;
use crate::error::Result;
use crate::grid::TileGrid;
use crate::strategy::{BlendingStrategy, PredictFn, StrategyKind, TiledState};
use crate::weights::{self, WeightField};
use crate::Canvas;

/// Softer-seam variant: tile outputs are de-emphasized toward tile
/// boundaries by a Gaussian mask *before* summation, and normalization
/// happens through a reciprocal weight field captured once for the whole
/// run instead of a division per step.
pub struct MixtureOfDiffusers {
    state: TiledState,
    tile_mask: Array2<f32>,
    rescale: WeightField,
}

impl MixtureOfDiffusers {
    #[must_use]
    pub fn new(grid: TileGrid, cancel: CancelToken) -> Self {
        // With no overlap or a single tile there is no seam to soften;
        // plain stitching weights keep the output bit-exact (Gaussian mask
        // times its reciprocal is not exactly 1.0 in f32).
        let mask_fn: fn(usize, usize) -> Array2<f32> = if grid.overlap == 0 || grid.is_single_tile()
        {
            weights::flat_mask
        } else {
            weights::gaussian_mask
        };
        let tile_mask = mask_fn(grid.tile_w, grid.tile_h);
        let state = TiledState::new(grid, mask_fn, cancel);
        let rescale = state.weights.mapv(f32::recip);
        Self {
            state,
            tile_mask,
            rescale,
        }
    }
}

impl BlendingStrategy for MixtureOfDiffusers {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MixtureOfDiffusers
    }

    fn grid(&self) -> &TileGrid {
        &self.state.grid
    }

    fn compose(
        &mut self,
        canvas: &Canvas,
        timestep: f32,
        conditioning: &Conditioning,
        predict: &mut PredictFn<'_>,
    ) -> Result<Canvas> {
        self.state.cancel.check()?;
        self.state.check_canvas(canvas)?;

        let batch = canvas.dim().0;
        let out = self
            .state
            .predict_tile_batch(canvas, timestep, conditioning, predict)?;

        let mut buffer = Canvas::zeros(canvas.dim());
        let mask = weights::broadcast_mask(&self.tile_mask);
        for (i, bbox) in self.state.grid.iter().enumerate() {
            let tile_out = out.slice(ndarray::s![i * batch..(i + 1) * batch, .., .., ..]);
            let tile_weight = &mask * &bbox.view(&self.rescale);
            let mut region = bbox.view_mut(&mut buffer);
            region += &(&tile_out * &tile_weight);
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::identity_predict;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    #[test]
    fn constant_field_is_preserved() {
        let grid = crate::grid::plan(48, 40, 24, 8).unwrap();
        let mut strategy = MixtureOfDiffusers::new(grid, CancelToken::new());
        let canvas = Array4::from_elem((1, 4, 40, 48), 3.5f32);
        let mut calls = 0;
        let out = strategy
            .compose(&canvas, 0.0, &Conditioning::new(), &mut identity_predict(&mut calls))
            .unwrap();
        assert_eq!(calls, 1);
        for &v in &out {
            assert_relative_eq!(v, 3.5, epsilon = 1e-4);
        }
    }

    #[test]
    fn zero_overlap_is_plain_stitching() {
        let grid = crate::grid::plan(32, 32, 16, 0).unwrap();
        let mut strategy = MixtureOfDiffusers::new(grid, CancelToken::new());
        let canvas = Array4::from_shape_fn((1, 2, 32, 32), |(_, c, y, x)| {
            (c * 1024 + y * 32 + x) as f32
        });
        let mut calls = 0;
        let out = strategy
            .compose(&canvas, 0.0, &Conditioning::new(), &mut identity_predict(&mut calls))
            .unwrap();
        assert_eq!(out, canvas);
    }

    #[test]
    fn single_tile_is_bit_identical() {
        let grid = crate::grid::plan(16, 16, 64, 8).unwrap();
        assert!(grid.is_single_tile());
        let mut strategy = MixtureOfDiffusers::new(grid, CancelToken::new());
        let canvas = crate::strategy::testing::graded_canvas(2, 4, 16, 16);
        let mut calls = 0;
        let out = strategy
            .compose(&canvas, 0.5, &Conditioning::new(), &mut identity_predict(&mut calls))
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(out, canvas);
    }

    #[test]
    fn rescale_is_reciprocal_of_weights() {
        let grid = crate::grid::plan(64, 64, 32, 16).unwrap();
        let strategy = MixtureOfDiffusers::new(grid, CancelToken::new());
        for (w, r) in strategy.state.weights.iter().zip(strategy.rescale.iter()) {
            assert_relative_eq!(w * r, 1.0, epsilon = 1e-5);
        }
    }
}
