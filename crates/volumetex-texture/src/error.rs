//! Texture build error types.

use thiserror::Error;

/// Texture-related errors.
#[derive(Error, Debug)]
pub enum TextureError {
    /// Voxel data model error.
    #[error(transparent)]
    Core(#[from] volumetex_core::Error),

    /// Scratch pixel buffer could not be allocated.
    #[error("Pixel buffer allocation failed: {0}")]
    AllocationFailed(String),

    /// Device refused to create the texture.
    #[error("Texture creation failed: {0}")]
    TextureCreation(String),

    /// Writing pixels into the texture failed.
    #[error("Texture upload failed: {0}")]
    Upload(String),

    /// The dataset holds no samples to derive bounds from.
    #[error("Dataset has no data")]
    EmptyDataset,

    /// Background worker failure.
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, TextureError>;
