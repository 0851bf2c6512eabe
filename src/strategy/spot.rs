//! SpotDiffusion: per-step cyclic canvas shifts vary which pixels land on
//! tile seams, so no seam position persists across the run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cancel::CancelToken;
use crate::conditioning::{roll4, Conditioning};
use crate::error::Result;
use crate::grid::TileGrid;
use crate::strategy::{BlendingStrategy, PredictFn, StrategyKind, TiledState};
use crate::weights;
use crate::Canvas;

/// Precomputed per-step `(dy, dx)` roll offsets, derived deterministically
/// from a seed. One entry per solver step; consumption wraps around if the
/// solver runs longer than planned.
#[derive(Debug, Clone)]
pub struct ShiftSchedule {
    offsets: Vec<(isize, isize)>,
}

impl ShiftSchedule {
    /// Draw one offset per step, bounded by tile size on each axis. An
    /// axis whose tile already spans the canvas gets a fixed zero shift;
    /// there is nothing to scramble.
    #[must_use]
    pub fn generate(seed: u64, steps: usize, grid: &TileGrid) -> Self {
        let mut rng_h = StdRng::seed_from_u64(seed);
        let mut rng_w = StdRng::seed_from_u64(seed.wrapping_add(1));
        let offsets = (0..steps.max(1))
            .map(|_| {
                let dy = if grid.tile_h >= grid.canvas_h {
                    0
                } else {
                    rng_h.random_range(0..grid.tile_h) as isize
                };
                let dx = if grid.tile_w >= grid.canvas_w {
                    0
                } else {
                    rng_w.random_range(0..grid.tile_w) as isize
                };
                (dy, dx)
            })
            .collect();
        Self { offsets }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Offset for a given solver step, wrapping past the end.
    #[must_use]
    pub fn offset(&self, step: usize) -> (isize, isize) {
        self.offsets[step % self.offsets.len()]
    }
}

/// Flat-weight strategy that cyclically shifts the whole canvas by a
/// seeded per-step offset before tiling and applies the exact inverse
/// shift to the composed result. The same offset must serve both the crop
/// and the un-shift of a step, so the offset is looked up once per call.
pub struct SpotDiffusion {
    state: TiledState,
    schedule: ShiftSchedule,
    step: usize,
}

impl SpotDiffusion {
    #[must_use]
    pub fn new(grid: TileGrid, seed: u64, steps: usize, cancel: CancelToken) -> Self {
        let schedule = ShiftSchedule::generate(seed, steps, &grid);
        Self {
            state: TiledState::new(grid, weights::flat_mask, cancel),
            schedule,
            step: 0,
        }
    }

    #[must_use]
    pub fn schedule(&self) -> &ShiftSchedule {
        &self.schedule
    }
}

impl BlendingStrategy for SpotDiffusion {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SpotDiffusion
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

        let (dy, dx) = self.schedule.offset(self.step);
        self.step += 1;

        let shifted = roll4(canvas, dy, dx);
        let shifted_cond = conditioning.rolled(dy, dx);

        let out = self
            .state
            .predict_tile_batch(&shifted, timestep, &shifted_cond, predict)?;
        let mut buffer = self.state.scatter_flat(&shifted, &out);
        self.state.normalize_flat(&mut buffer);

        // Normalize in the shifted frame, then undo the shift exactly.
        Ok(roll4(&buffer, -dy, -dx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{graded_canvas, identity_predict};
    use approx::assert_relative_eq;

    #[test]
    fn schedule_is_deterministic_and_bounded() {
        let grid = crate::grid::plan(64, 48, 24, 8).unwrap();
        let a = ShiftSchedule::generate(42, 20, &grid);
        let b = ShiftSchedule::generate(42, 20, &grid);
        assert_eq!(a.len(), 20);
        for step in 0..20 {
            assert_eq!(a.offset(step), b.offset(step));
            let (dy, dx) = a.offset(step);
            assert!((0..grid.tile_h as isize).contains(&dy));
            assert!((0..grid.tile_w as isize).contains(&dx));
        }
    }

    #[test]
    fn different_seeds_differ() {
        let grid = crate::grid::plan(256, 256, 64, 16).unwrap();
        let a = ShiftSchedule::generate(1, 32, &grid);
        let b = ShiftSchedule::generate(2, 32, &grid);
        assert!((0..32).any(|s| a.offset(s) != b.offset(s)));
    }

    #[test]
    fn spanning_axis_gets_zero_shift() {
        // tile spans the full height, so dy must always be 0
        let grid = crate::grid::plan(96, 16, 24, 8).unwrap();
        assert_eq!(grid.tile_h, 16);
        let schedule = ShiftSchedule::generate(7, 16, &grid);
        for step in 0..16 {
            assert_eq!(schedule.offset(step).0, 0);
        }
    }

    #[test]
    fn identity_prediction_reproduces_canvas_across_steps() {
        let grid = crate::grid::plan(48, 48, 24, 8).unwrap();
        let mut strategy = SpotDiffusion::new(grid, 99, 5, CancelToken::new());
        let canvas = graded_canvas(1, 2, 48, 48);
        let mut calls = 0;
        for step in 0..5 {
            let out = strategy
                .compose(&canvas, step as f32, &Conditioning::new(), &mut identity_predict(&mut calls))
                .unwrap();
            for (a, b) in out.iter().zip(canvas.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-3);
            }
        }
        assert_eq!(calls, 5);
    }

    #[test]
    fn zero_overlap_is_plain_stitching() {
        let grid = crate::grid::plan(32, 32, 16, 0).unwrap();
        let mut strategy = SpotDiffusion::new(grid, 3, 4, CancelToken::new());
        let canvas = graded_canvas(1, 1, 32, 32);
        let mut calls = 0;
        let out = strategy
            .compose(&canvas, 0.0, &Conditioning::new(), &mut identity_predict(&mut calls))
            .unwrap();
        // shift + stitch + exact inverse shift: bit-identical
        assert_eq!(out, canvas);
    }

    #[test]
    fn single_tile_never_shifts() {
        let grid = crate::grid::plan(16, 16, 32, 8).unwrap();
        assert!(grid.is_single_tile());
        let mut strategy = SpotDiffusion::new(grid, 5, 8, CancelToken::new());
        let canvas = graded_canvas(1, 3, 16, 16);
        let mut calls = 0;
        let out = strategy
            .compose(&canvas, 0.0, &Conditioning::new(), &mut identity_predict(&mut calls))
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(out, canvas);
    }
}
