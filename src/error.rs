//! Custom error types for tilediff.

use thiserror::Error;

/// Boxed error produced by caller-supplied prediction / codec closures.
pub type PredictError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the tilediff library.
#[derive(Error, Debug)]
pub enum Error {
    /// The canvas/tile/overlap combination cannot produce a usable grid.
    #[error("invalid tile geometry: {reason}")]
    InvalidGeometry { reason: String },

    /// The wrapped noise-prediction call failed. A partially composed
    /// canvas is meaningless, so the whole run aborts; never retried.
    #[error("noise prediction failed in {call}: {source}")]
    Prediction {
        /// Which call failed: the batched per-step call or a single tile.
        call: String,
        #[source]
        source: PredictError,
    },

    /// The caller's encode/decode transform failed for a tile.
    #[error("codec transform failed on tile {tile}: {source}")]
    Codec {
        tile: usize,
        #[source]
        source: PredictError,
    },

    /// Cooperative cancellation observed between steps or tiles.
    /// Expected termination, not a fault.
    #[error("sampling cancelled")]
    Cancelled,

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl Error {
    pub(crate) fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }
}

/// Result type alias for tilediff operations.
pub type Result<T> = std::result::Result<T, Error>;
