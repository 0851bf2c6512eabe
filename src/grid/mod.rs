//! Tile grid planning: bounding boxes and deterministic grid layout.

mod bbox;
mod planner;

pub use bbox::BBox;
pub use planner::{plan, TileGrid};

/// Fixed integer ratio between pixel-space and latent-space coordinates.
/// Tile sizes are rounded up to multiples of this so a latent-space grid
/// maps exactly onto a pixel-space grid.
pub const COMPRESSION_FACTOR: usize = 8;
