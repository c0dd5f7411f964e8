//! Error types for the voxel data model.

use thiserror::Error;

/// Data model error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Voxel coordinate outside the grid
    #[error("Index out of range: ({x}, {y}, {z}) not within {dims:?}")]
    IndexOutOfRange {
        x: usize,
        y: usize,
        z: usize,
        dims: [usize; 3],
    },

    /// Grid dimensions that cannot hold any data
    #[error("Invalid dimensions: {0:?}")]
    InvalidDimensions([usize; 3]),

    /// Data array length disagrees with the dimensions
    #[error("Data length mismatch: expected {expected} voxels, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
