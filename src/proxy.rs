//! Call interception: substitute tiled composition for the network's
//! whole-canvas forward call without the outer solver noticing.

use crate::cancel::CancelToken;
use crate::conditioning::Conditioning;
use crate::error::{PredictError, Result};
use crate::grid;
use crate::strategy::{make_strategy, BlendingStrategy, PredictFn, StrategyKind};
use crate::Canvas;

/// Tiling parameters the proxy plans grids from, in canvas (latent) units.
#[derive(Debug, Clone, Copy)]
pub struct TilingConfig {
    pub max_tile: usize,
    pub overlap: usize,
}

/// Wraps a noise-prediction function so the solver's unchanged step loop
/// thinks it is calling a normal whole-canvas function. The tile grid and
/// strategy are derived lazily on first call and re-derived whenever the
/// canvas height/width differ from the cached grid (a new run at a new
/// resolution); the weight field inside the strategy is cached across
/// calls within one run.
pub struct TiledModelCallProxy {
    config: TilingConfig,
    kind: StrategyKind,
    seed: u64,
    steps: usize,
    cancel: CancelToken,
    strategy: Option<Box<dyn BlendingStrategy>>,
}

impl TiledModelCallProxy {
    #[must_use]
    pub fn new(config: TilingConfig, kind: StrategyKind, seed: u64, steps: usize) -> Self {
        Self {
            config,
            kind,
            seed,
            steps,
            cancel: CancelToken::new(),
            strategy: None,
        }
    }

    /// Use an externally shared cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drop-in replacement for one `predict(canvas, timestep, cond)` call.
    ///
    /// # Errors
    ///
    /// Grid planning errors surface as [`crate::Error::InvalidGeometry`];
    /// everything else propagates from the strategy's compose.
    pub fn call(
        &mut self,
        canvas: &Canvas,
        timestep: f32,
        conditioning: &Conditioning,
        predict: &mut PredictFn<'_>,
    ) -> Result<Canvas> {
        let (_, _, h, w) = canvas.dim();
        let strategy = match &mut self.strategy {
            Some(s) if s.grid().matches(h, w) => s,
            slot => {
                let grid = grid::plan(w, h, self.config.max_tile, self.config.overlap)?;
                tracing::info!(
                    "planned grid {} for {w}x{h} canvas ({})",
                    grid.summary(),
                    self.kind
                );
                slot.insert(make_strategy(
                    self.kind,
                    grid,
                    self.seed,
                    self.steps,
                    self.cancel.clone(),
                ))
            }
        };
        strategy.compose(canvas, timestep, conditioning, predict)
    }

    /// Consume the proxy into a closure usable wherever the solver expects
    /// the plain prediction function.
    pub fn wrap<'a, P>(
        mut self,
        mut predict: P,
    ) -> impl FnMut(&Canvas, f32, &Conditioning) -> Result<Canvas> + 'a
    where
        P: FnMut(&Canvas, f32, &Conditioning) -> std::result::Result<Canvas, PredictError> + 'a,
    {
        move |canvas, timestep, conditioning| {
            self.call(canvas, timestep, conditioning, &mut predict)
        }
    }
}

/// One-shot form: wrap an already built strategy around a prediction
/// function. No hidden registry, no monkey-patching; the caller passes the
/// wrapped function explicitly through the call chain and discards it
/// afterwards.
pub fn wrap<'a, P>(
    mut predict: P,
    mut strategy: Box<dyn BlendingStrategy + 'a>,
) -> impl FnMut(&Canvas, f32, &Conditioning) -> Result<Canvas> + 'a
where
    P: FnMut(&Canvas, f32, &Conditioning) -> std::result::Result<Canvas, PredictError> + 'a,
{
    move |canvas, timestep, conditioning| strategy.compose(canvas, timestep, conditioning, &mut predict)
}
