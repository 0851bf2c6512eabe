//! Per-step tile blending strategies.
//!
//! A strategy stands in for the network's single whole-canvas forward call
//! inside the solver's step loop: it decomposes the canvas into tiles,
//! runs the wrapped prediction on them (batched into one call), and
//! composes the per-tile outputs back into a full canvas.

mod mixture;
mod multi;
mod spot;

pub use mixture::MixtureOfDiffusers;
pub use multi::MultiDiffusion;
pub use spot::{ShiftSchedule, SpotDiffusion};

use std::str::FromStr;

use ndarray::{concatenate, s, Array2, Axis, Zip};

use crate::cancel::CancelToken;
use crate::conditioning::Conditioning;
use crate::error::{Error, PredictError, Result};
use crate::grid::TileGrid;
use crate::weights::{self, WeightField};
use crate::Canvas;

/// Signature of the externally supplied noise/velocity prediction call.
pub type PredictFn<'a> =
    dyn FnMut(&Canvas, f32, &Conditioning) -> std::result::Result<Canvas, PredictError> + 'a;

/// The three tile blending behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    MultiDiffusion,
    MixtureOfDiffusers,
    SpotDiffusion,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MultiDiffusion => "multi_diffusion",
            Self::MixtureOfDiffusers => "mixture_of_diffusers",
            Self::SpotDiffusion => "spot_diffusion",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "multi_diffusion" | "multidiffusion" => Ok(Self::MultiDiffusion),
            "mixture_of_diffusers" | "mixture" => Ok(Self::MixtureOfDiffusers),
            "spot_diffusion" | "spotdiffusion" => Ok(Self::SpotDiffusion),
            other => Err(Error::InvalidParameter {
                name: "strategy".to_string(),
                reason: format!("unknown kind: {other}"),
            }),
        }
    }
}

/// One per-step compose behavior over a fixed tile grid.
pub trait BlendingStrategy {
    /// Which behavior this is.
    fn kind(&self) -> StrategyKind;

    /// The grid this strategy was built for.
    fn grid(&self) -> &TileGrid;

    /// Stand-in for one `predict(canvas, timestep, conditioning)` call:
    /// splits the canvas over the grid, predicts all tiles, and returns
    /// the re-composed full-canvas prediction.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when cancellation was requested,
    /// [`Error::Prediction`] when the wrapped call fails (the run aborts),
    /// [`Error::ShapeMismatch`] when the canvas does not match the grid.
    fn compose(
        &mut self,
        canvas: &Canvas,
        timestep: f32,
        conditioning: &Conditioning,
        predict: &mut PredictFn<'_>,
    ) -> Result<Canvas>;
}

/// Build a boxed strategy. `seed` and `steps` only affect SpotDiffusion's
/// shift schedule; the others ignore them.
#[must_use]
pub fn make_strategy(
    kind: StrategyKind,
    grid: TileGrid,
    seed: u64,
    steps: usize,
    cancel: CancelToken,
) -> Box<dyn BlendingStrategy> {
    tracing::info!("using {kind} over grid {}", grid.summary());
    match kind {
        StrategyKind::MultiDiffusion => Box::new(MultiDiffusion::new(grid, cancel)),
        StrategyKind::MixtureOfDiffusers => Box::new(MixtureOfDiffusers::new(grid, cancel)),
        StrategyKind::SpotDiffusion => Box::new(SpotDiffusion::new(grid, seed, steps, cancel)),
    }
}

/// State shared by all strategies: the grid, the run-long weight field and
/// the cancellation token. The weight field is computed once and reused,
/// unmodified, across all solver steps of one run.
pub(crate) struct TiledState {
    pub grid: TileGrid,
    pub weights: WeightField,
    pub cancel: CancelToken,
}

impl TiledState {
    pub fn new<F>(grid: TileGrid, mask_fn: F, cancel: CancelToken) -> Self
    where
        F: Fn(usize, usize) -> Array2<f32>,
    {
        let weights = weights::accumulate(&grid, mask_fn);
        Self {
            grid,
            weights,
            cancel,
        }
    }

    /// The canvas must have the height/width this grid was planned for;
    /// re-planning on resolution change is the proxy's job.
    pub fn check_canvas(&self, canvas: &Canvas) -> Result<()> {
        let (_, _, h, w) = canvas.dim();
        if self.grid.matches(h, w) {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: format!("{}x{} canvas", self.grid.canvas_w, self.grid.canvas_h),
                actual: format!("{w}x{h}"),
            })
        }
    }

    /// Crop every tile out of `canvas`, concatenate them into one batched
    /// call (tile-major order), run the prediction once, and validate the
    /// output batch shape.
    pub fn predict_tile_batch(
        &self,
        canvas: &Canvas,
        timestep: f32,
        conditioning: &Conditioning,
        predict: &mut PredictFn<'_>,
    ) -> Result<Canvas> {
        let batch = canvas.dim().0;
        let crops: Vec<_> = self.grid.iter().map(|b| b.view(canvas)).collect();
        let tiles = concatenate(Axis(0), &crops).map_err(|_| Error::ShapeMismatch {
            expected: "equally sized tiles".into(),
            actual: "ragged tile crops".into(),
        })?;
        let tile_cond = conditioning.for_tiles(self.grid.bboxes(), batch);

        let out = predict(&tiles, timestep, &tile_cond).map_err(|source| Error::Prediction {
            call: format!("batched call over {} tiles", self.grid.len()),
            source,
        })?;
        if out.dim() != tiles.dim() {
            return Err(Error::ShapeMismatch {
                expected: format!("{:?}", tiles.dim()),
                actual: format!("{:?}", out.dim()),
            });
        }
        Ok(out)
    }

    /// Scatter-add each tile's slice of the batched output into a zeroed
    /// blend buffer, unweighted.
    pub fn scatter_flat(&self, canvas: &Canvas, out: &Canvas) -> Canvas {
        let batch = canvas.dim().0;
        let mut buffer = Canvas::zeros(canvas.dim());
        for (i, bbox) in self.grid.iter().enumerate() {
            let tile_out = out.slice(s![i * batch..(i + 1) * batch, .., .., ..]);
            let mut region = bbox.view_mut(&mut buffer);
            region += &tile_out;
        }
        buffer
    }

    /// Divide overlap regions by their accumulated weight. Locations
    /// covered by exactly one tile bypass the division to avoid needless
    /// floating rounding.
    pub fn normalize_flat(&self, buffer: &mut Canvas) {
        Zip::from(buffer)
            .and_broadcast(&self.weights)
            .for_each(|v, &w| {
                if w > 1.0 {
                    *v /= w;
                }
            });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ndarray::Array4;

    /// Prediction stand-in that returns its input untouched and counts
    /// invocations.
    pub fn identity_predict(
        calls: &mut usize,
    ) -> impl FnMut(&Canvas, f32, &Conditioning) -> std::result::Result<Canvas, PredictError> + '_
    {
        move |tiles, _t, _c| {
            *calls += 1;
            Ok(tiles.clone())
        }
    }

    pub fn graded_canvas(n: usize, c: usize, h: usize, w: usize) -> Canvas {
        Array4::from_shape_fn((n, c, h, w), |(b, ch, y, x)| {
            (b * 7919 + ch * 311 + y * 31 + x) as f32 * 0.01
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_both_spellings() {
        assert_eq!(
            "multi_diffusion".parse::<StrategyKind>().unwrap(),
            StrategyKind::MultiDiffusion
        );
        assert_eq!(
            "mixture".parse::<StrategyKind>().unwrap(),
            StrategyKind::MixtureOfDiffusers
        );
        assert_eq!(
            "spot_diffusion".parse::<StrategyKind>().unwrap(),
            StrategyKind::SpotDiffusion
        );
        assert!("gaussian".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn factory_builds_requested_kind() {
        let grid = crate::grid::plan(32, 32, 16, 8).unwrap();
        for kind in [
            StrategyKind::MultiDiffusion,
            StrategyKind::MixtureOfDiffusers,
            StrategyKind::SpotDiffusion,
        ] {
            let strategy = make_strategy(kind, grid.clone(), 0, 4, CancelToken::new());
            assert_eq!(strategy.kind(), kind);
            assert_eq!(strategy.grid().len(), grid.len());
        }
    }
}
