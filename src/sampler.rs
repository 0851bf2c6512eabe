//! Whole-tile sampling: run the entire multi-step solve per tile, then
//! feather-blend finished tiles.
//!
//! Unlike the per-step strategies this never intercepts individual solver
//! steps, so it needs no access to the solver's internals; the trade-off
//! is that each tile is denoised independently of its neighbors' evolving
//! state and seams can show faint content discontinuities.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array4;

use crate::cancel::CancelToken;
use crate::conditioning::Conditioning;
use crate::error::{Error, PredictError, Result};
use crate::grid::TileGrid;
use crate::weights::{self, WeightField};
use crate::Canvas;

/// Signature of the externally driven full solve over one tile: takes the
/// tile's initial state and cropped conditioning, returns the finished
/// tile after the whole noise schedule.
pub type SolveFn<'a> =
    dyn FnMut(&Canvas, &Conditioning) -> std::result::Result<Canvas, PredictError> + 'a;

/// Run the caller's complete solve independently on every tile crop and
/// composite the finished tiles once, using 1-D-separable feather masks.
///
/// # Errors
///
/// [`Error::ShapeMismatch`] when the canvas or a solved tile does not
/// match the grid, [`Error::Prediction`] when the solve fails for a tile
/// (the run aborts), [`Error::Cancelled`] between tiles.
pub fn whole_tile_sample(
    canvas: &Canvas,
    conditioning: &Conditioning,
    grid: &TileGrid,
    solve: &mut SolveFn<'_>,
    cancel: &CancelToken,
) -> Result<Canvas> {
    let (_, _, h, w) = canvas.dim();
    if !grid.matches(h, w) {
        return Err(Error::ShapeMismatch {
            expected: format!("{}x{} canvas", grid.canvas_w, grid.canvas_h),
            actual: format!("{w}x{h}"),
        });
    }

    tracing::info!("whole-tile sampling over grid {}", grid.summary());

    let feather = weights::feather_mask(grid.tile_w, grid.tile_h, grid.overlap);
    let mask = weights::broadcast_mask(&feather);

    let mut buffer = Canvas::zeros(canvas.dim());
    let mut blend: WeightField = Array4::zeros((1, 1, h, w));

    let pb = ProgressBar::new(grid.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Sampling tiles [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    for (i, bbox) in grid.iter().enumerate() {
        cancel.check()?;

        let tile = bbox.crop(canvas);
        let tile_cond = conditioning.crop(bbox);
        let solved = solve(&tile, &tile_cond).map_err(|source| Error::Prediction {
            call: format!("tile {i} ({bbox})"),
            source,
        })?;
        if solved.dim() != tile.dim() {
            return Err(Error::ShapeMismatch {
                expected: format!("{:?}", tile.dim()),
                actual: format!("{:?}", solved.dim()),
            });
        }

        let mut region = bbox.view_mut(&mut buffer);
        region += &(&solved * &mask);
        let mut blend_region = bbox.view_mut(&mut blend);
        blend_region += &mask;
        pb.inc(1);
    }
    pb.finish_and_clear();

    weights::clamp_weights(&mut blend);
    Ok(&buffer / &blend)
}
