//! Tiled pixel↔latent transform. The encode/decode pair is memory-bound
//! on large canvases independent of the sampler, so it gets the same
//! tiling treatment with its own feathering.
//!
//! Both directions take the *latent-space* grid the sampler was planned
//! with; pixel-space coordinates are derived by scaling every box by the
//! compression factor. Deriving both from one plan is what keeps the two
//! tilings consistent; planning them separately doubles the seams.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array4;

use crate::cancel::CancelToken;
use crate::conditioning::Conditioning;
use crate::error::{Error, PredictError, Result};
use crate::grid::{BBox, TileGrid, COMPRESSION_FACTOR};
use crate::weights::{self, WeightField};
use crate::Canvas;

/// Encode a pixel canvas to latent space tile-by-tile.
///
/// `encode` maps one pixel tile to its latent tile (spatial dimensions
/// divided by the compression factor; the channel count may change and is
/// learned from the first encoded tile).
///
/// # Errors
///
/// [`Error::ShapeMismatch`] when the input or a transformed tile does not
/// match the grid, [`Error::Codec`] when the transform fails for a tile,
/// [`Error::Cancelled`] between tiles.
pub fn tiled_encode<F>(
    pixels: &Canvas,
    grid: &TileGrid,
    encode: F,
    cancel: &CancelToken,
) -> Result<Canvas>
where
    F: FnMut(&Canvas) -> std::result::Result<Canvas, PredictError>,
{
    let pixel_grid = grid.scaled(COMPRESSION_FACTOR);
    run_pass(pixels, &pixel_grid, grid, encode, cancel, "Encoding")
}

/// Decode a latent canvas to pixel space tile-by-tile.
///
/// `decode` maps one latent tile to its pixel tile (spatial dimensions
/// multiplied by the compression factor).
///
/// # Errors
///
/// Same taxonomy as [`tiled_encode`].
pub fn tiled_decode<F>(
    latent: &Canvas,
    grid: &TileGrid,
    decode: F,
    cancel: &CancelToken,
) -> Result<Canvas>
where
    F: FnMut(&Canvas) -> std::result::Result<Canvas, PredictError>,
{
    let pixel_grid = grid.scaled(COMPRESSION_FACTOR);
    run_pass(latent, grid, &pixel_grid, decode, cancel, "Decoding")
}

/// Shared tile loop: crop from `in_grid`, transform, feather-accumulate
/// into `out_grid` coordinates. The output buffer is allocated lazily from
/// the first transformed tile, since the transform may change batch or
/// channel counts.
fn run_pass<F>(
    input: &Canvas,
    in_grid: &TileGrid,
    out_grid: &TileGrid,
    mut transform: F,
    cancel: &CancelToken,
    label: &str,
) -> Result<Canvas>
where
    F: FnMut(&Canvas) -> std::result::Result<Canvas, PredictError>,
{
    let (_, _, h, w) = input.dim();
    if !in_grid.matches(h, w) {
        return Err(Error::ShapeMismatch {
            expected: format!("{}x{} canvas", in_grid.canvas_w, in_grid.canvas_h),
            actual: format!("{w}x{h}"),
        });
    }

    tracing::info!(
        "{label} {} tiles ({} -> {})",
        in_grid.len(),
        in_grid.summary(),
        out_grid.summary()
    );

    let feather = weights::feather_mask(out_grid.tile_w, out_grid.tile_h, out_grid.overlap);
    let mask = weights::broadcast_mask(&feather);

    let mut buffer: Option<Canvas> = None;
    let mut blend: WeightField = Array4::zeros((1, 1, out_grid.canvas_h, out_grid.canvas_w));

    let pb = ProgressBar::new(in_grid.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(label.to_string());

    for (i, (in_bbox, out_bbox)) in in_grid.iter().zip(out_grid.iter()).enumerate() {
        cancel.check()?;

        let tile = in_bbox.crop(input);
        let transformed = transform(&tile).map_err(|source| Error::Codec { tile: i, source })?;
        let (tb, tc, th, tw) = transformed.dim();
        if (th, tw) != (out_bbox.h, out_bbox.w) {
            return Err(Error::ShapeMismatch {
                expected: format!("{}x{} tile", out_bbox.w, out_bbox.h),
                actual: format!("{tw}x{th}"),
            });
        }

        let out = buffer.get_or_insert_with(|| {
            Canvas::zeros((tb, tc, out_grid.canvas_h, out_grid.canvas_w))
        });
        if (out.dim().0, out.dim().1) != (tb, tc) {
            return Err(Error::ShapeMismatch {
                expected: format!("({}, {}) batch/channels", out.dim().0, out.dim().1),
                actual: format!("({tb}, {tc})"),
            });
        }

        accumulate_tile(out, &mut blend, out_bbox, &transformed, &mask);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut out = buffer.ok_or_else(|| Error::ShapeMismatch {
        expected: "at least one tile".into(),
        actual: "empty grid".into(),
    })?;
    weights::clamp_weights(&mut blend);
    out = &out / &blend;
    Ok(out)
}

fn accumulate_tile(
    out: &mut Canvas,
    blend: &mut WeightField,
    bbox: &BBox,
    tile: &Canvas,
    mask: &ndarray::ArrayView4<'_, f32>,
) {
    let mut region = bbox.view_mut(out);
    region += &(tile * mask);
    let mut blend_region = bbox.view_mut(blend);
    blend_region += mask;
}

/// Synthetic encode/decode pair used by the demo binary and tests: encode
/// is an 8x8 block mean, decode a nearest-neighbor upsample. A true
/// inverse pair on block-constant content.
pub mod reference {
    use super::{Canvas, PredictError, COMPRESSION_FACTOR};
    use ndarray::Array4;

    /// Mean-pool each `COMPRESSION_FACTOR`-sized block.
    ///
    /// # Errors
    ///
    /// Fails when the spatial dimensions are not multiples of the
    /// compression factor.
    pub fn pool_encode(pixels: &Canvas) -> std::result::Result<Canvas, PredictError> {
        let (n, c, h, w) = pixels.dim();
        let f = COMPRESSION_FACTOR;
        if h % f != 0 || w % f != 0 {
            return Err(format!("pixel tile {w}x{h} not divisible by {f}").into());
        }
        let mut latent = Array4::zeros((n, c, h / f, w / f));
        let scale = (f * f) as f32;
        for b in 0..n {
            for ch in 0..c {
                for y in 0..h / f {
                    for x in 0..w / f {
                        let mut sum = 0.0;
                        for dy in 0..f {
                            for dx in 0..f {
                                sum += pixels[[b, ch, y * f + dy, x * f + dx]];
                            }
                        }
                        latent[[b, ch, y, x]] = sum / scale;
                    }
                }
            }
        }
        Ok(latent)
    }

    /// Nearest-neighbor upsample by the compression factor.
    ///
    /// # Errors
    ///
    /// Infallible in practice; kept fallible to match the codec signature.
    pub fn upsample_decode(latent: &Canvas) -> std::result::Result<Canvas, PredictError> {
        let (n, c, h, w) = latent.dim();
        let f = COMPRESSION_FACTOR;
        Ok(Array4::from_shape_fn((n, c, h * f, w * f), |(b, ch, y, x)| {
            latent[[b, ch, y / f, x / f]]
        }))
    }
}

/// Convenience: whole-tile sample in latent space, then decode the result
/// tile-by-tile with the same grid. Mirrors the original all-in-one node's
/// sample-then-decode flow.
///
/// # Errors
///
/// Propagates from [`crate::sampler::whole_tile_sample`] and
/// [`tiled_decode`].
pub fn sample_and_decode<F>(
    latent: &Canvas,
    conditioning: &Conditioning,
    grid: &TileGrid,
    solve: &mut crate::sampler::SolveFn<'_>,
    decode: F,
    cancel: &CancelToken,
) -> Result<Canvas>
where
    F: FnMut(&Canvas) -> std::result::Result<Canvas, PredictError>,
{
    let sampled = crate::sampler::whole_tile_sample(latent, conditioning, grid, solve, cancel)?;
    tiled_decode(&sampled, grid, decode, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::graded_canvas;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    #[test]
    fn encode_shrinks_and_decode_restores_shape() {
        let grid = crate::grid::plan(48, 32, 24, 8).unwrap();
        let pixels = graded_canvas(1, 3, 256, 384);
        let latent =
            tiled_encode(&pixels, &grid, reference::pool_encode, &CancelToken::new()).unwrap();
        assert_eq!(latent.dim(), (1, 3, 32, 48));
        let restored =
            tiled_decode(&latent, &grid, reference::upsample_decode, &CancelToken::new())
                .unwrap();
        assert_eq!(restored.dim(), pixels.dim());
    }

    #[test]
    fn round_trip_is_identity_on_block_constant_content() {
        let grid = crate::grid::plan(32, 24, 16, 8).unwrap();
        // constant per 8x8 block, so pooling then upsampling is lossless
        let pixels = Array4::from_shape_fn((1, 2, 192, 256), |(_, c, y, x)| {
            (c * 31 + (y / 8) * 3 + (x / 8)) as f32 * 0.125
        });
        let latent =
            tiled_encode(&pixels, &grid, reference::pool_encode, &CancelToken::new()).unwrap();
        let restored =
            tiled_decode(&latent, &grid, reference::upsample_decode, &CancelToken::new())
                .unwrap();
        for (a, b) in restored.iter().zip(pixels.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn channel_change_is_learned_from_first_tile() {
        let grid = crate::grid::plan(32, 32, 16, 8).unwrap();
        let pixels = graded_canvas(1, 3, 256, 256);
        // a transform that maps 3 pixel channels to 4 latent ones
        let encode = |tile: &Canvas| {
            let pooled = reference::pool_encode(tile)?;
            let (n, _, h, w) = pooled.dim();
            Ok(Array4::from_shape_fn((n, 4, h, w), |(b, c, y, x)| {
                pooled[[b, c.min(2), y, x]]
            }))
        };
        let latent = tiled_encode(&pixels, &grid, encode, &CancelToken::new()).unwrap();
        assert_eq!(latent.dim(), (1, 4, 32, 32));
    }

    #[test]
    fn wrong_input_size_is_rejected() {
        let grid = crate::grid::plan(32, 32, 16, 8).unwrap();
        let latent = graded_canvas(1, 4, 16, 16);
        let err = tiled_decode(&latent, &grid, reference::upsample_decode, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn codec_failure_names_the_tile() {
        let grid = crate::grid::plan(32, 32, 16, 8).unwrap();
        let latent = graded_canvas(1, 4, 32, 32);
        let mut seen = 0;
        let decode = |tile: &Canvas| {
            seen += 1;
            if seen == 2 {
                Err("device out of memory".into())
            } else {
                reference::upsample_decode(tile)
            }
        };
        let err = tiled_decode(&latent, &grid, decode, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::Codec { tile: 1, .. }));
    }
}
