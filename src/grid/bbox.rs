//! Rectangular canvas sub-regions.

use std::ops::Range;

use ndarray::{s, Array4, ArrayView4, ArrayViewMut4};

use crate::Canvas;

/// Integer rectangle in canvas coordinate units, immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl BBox {
    #[must_use]
    pub const fn new(x: usize, y: usize, w: usize, h: usize) -> Self {
        Self { x, y, w, h }
    }

    /// Row index range this box covers (height axis).
    #[must_use]
    pub const fn rows(&self) -> Range<usize> {
        self.y..self.y + self.h
    }

    /// Column index range this box covers (width axis).
    #[must_use]
    pub const fn cols(&self) -> Range<usize> {
        self.x..self.x + self.w
    }

    /// The same rectangle in a coordinate system `factor` times finer,
    /// e.g. latent-space coordinates to pixel-space ones.
    #[must_use]
    pub const fn scaled(&self, factor: usize) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            w: self.w * factor,
            h: self.h * factor,
        }
    }

    /// Borrow the region of `canvas` this box covers.
    #[must_use]
    pub fn view<'a>(&self, canvas: &'a Canvas) -> ArrayView4<'a, f32> {
        canvas.slice(s![.., .., self.rows(), self.cols()])
    }

    /// Mutably borrow the region of `canvas` this box covers.
    pub fn view_mut<'a>(&self, canvas: &'a mut Canvas) -> ArrayViewMut4<'a, f32> {
        canvas.slice_mut(s![.., .., self.rows(), self.cols()])
    }

    /// Copy the region of `canvas` this box covers into an owned tile.
    #[must_use]
    pub fn crop(&self, canvas: &Canvas) -> Array4<f32> {
        self.view(canvas).to_owned()
    }
}

impl std::fmt::Display for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn crop_extracts_region() {
        let mut canvas = Array4::<f32>::zeros((1, 2, 8, 8));
        canvas[[0, 1, 3, 5]] = 7.0;
        let bbox = BBox::new(4, 2, 4, 4);
        let tile = bbox.crop(&canvas);
        assert_eq!(tile.dim(), (1, 2, 4, 4));
        assert_eq!(tile[[0, 1, 1, 1]], 7.0);
    }

    #[test]
    fn scaled_multiplies_all_fields() {
        let bbox = BBox::new(3, 5, 16, 24).scaled(8);
        assert_eq!(bbox, BBox::new(24, 40, 128, 192));
    }
}
