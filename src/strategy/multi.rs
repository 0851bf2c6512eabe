//! MultiDiffusion: flat per-tile weights, normalization after summation.

use crate::cancel::CancelToken;
use crate::conditioning::Conditioning;
use crate::error::Result;
use crate::grid::TileGrid;
use crate::strategy::{BlendingStrategy, PredictFn, StrategyKind, TiledState};
use crate::weights;
use crate::Canvas;

/// The baseline strategy: every tile contributes with uniform weight and
/// overlap regions are averaged after all tiles of the step are summed.
pub struct MultiDiffusion {
    state: TiledState,
}

impl MultiDiffusion {
    #[must_use]
    pub fn new(grid: TileGrid, cancel: CancelToken) -> Self {
        Self {
            state: TiledState::new(grid, weights::flat_mask, cancel),
        }
    }
}

impl BlendingStrategy for MultiDiffusion {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MultiDiffusion
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

        let out = self
            .state
            .predict_tile_batch(canvas, timestep, conditioning, predict)?;
        let mut buffer = self.state.scatter_flat(canvas, &out);
        self.state.normalize_flat(&mut buffer);
        Ok(buffer)
    }
}
