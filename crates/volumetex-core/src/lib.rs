//! Core data model for Volumetex.
//!
//! This crate provides the CPU-side building blocks shared by the texture
//! builders:
//! - The flattened scalar voxel grid with addressing and 2x downscaling
//! - Value bounds computation and its lazily filled cache
//! - Staged progress reporting
//! - Common error types

pub mod bounds;
pub mod error;
pub mod grid;
pub mod progress;

pub use bounds::{compute_bounds, compute_bounds_of, BoundsCache, ValueBounds};
pub use error::{Error, Result};
pub use grid::VoxelGrid;
pub use progress::{NullProgress, ProgressHandler, ProgressView, StagedProgress};

/// Crate-wide constants
pub mod constants {
    /// Largest extent allowed along any grid axis before downscaling kicks in
    pub const MAX_DIMENSION: usize = 2048;
}
