//! # `tilediff`
//!
//! A tiled diffusion sampling engine: evaluate a denoising diffusion model
//! as a mosaic of overlapping tiles while producing output
//! indistinguishable from a single whole-canvas pass.
//!
//! The solver, the noise-prediction network, and the pixel↔latent codec
//! are external collaborators supplied as closures; this crate owns the
//! grid planning, the per-tile weighting mathematics, the per-step
//! blending strategies, and the call interception that keeps the outer
//! solver unaware of the tiling.
//!
//! ## Example
//!
//! ```no_run
//! use tilediff::{Conditioning, StrategyKind, TiledModelCallProxy, TilingConfig};
//!
//! # fn main() -> tilediff::Result<()> {
//! let proxy = TiledModelCallProxy::new(
//!     TilingConfig { max_tile: 64, overlap: 8 },
//!     StrategyKind::MixtureOfDiffusers,
//!     0,
//!     20,
//! );
//! let mut predict = proxy.wrap(|tiles, _t, _cond| Ok(tiles.clone()));
//!
//! let canvas = ndarray::Array4::<f32>::zeros((1, 4, 100, 150));
//! let cond = Conditioning::new();
//! // inside the solver's step loop, in place of the direct model call:
//! let prediction = predict(&canvas, 0.5, &cond)?;
//! # let _ = prediction;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod codec;
pub mod conditioning;
pub mod error;
pub mod grid;
pub mod proxy;
pub mod sampler;
pub mod strategy;
pub mod weights;

use ndarray::Array4;

/// Full-resolution tensor being processed, NCHW order
/// (batch, channels, height, width), in latent or pixel units.
pub type Canvas = Array4<f32>;

pub use cancel::CancelToken;
pub use codec::{tiled_decode, tiled_encode};
pub use conditioning::Conditioning;
pub use error::{Error, PredictError, Result};
pub use grid::{plan, BBox, TileGrid, COMPRESSION_FACTOR};
pub use proxy::{wrap, TiledModelCallProxy, TilingConfig};
pub use sampler::whole_tile_sample;
pub use strategy::{make_strategy, BlendingStrategy, StrategyKind};
