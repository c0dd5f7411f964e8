//! Gradient estimation.
//!
//! Gradients are expressed in normalized value units per voxel: a ramp that
//! rises by the full value range over `n` voxels has a gradient of `1 / n`.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use volumetex_core::{ProgressHandler, ValueBounds, VoxelGrid};

/// Estimates the gradient of the scalar field at a voxel.
pub trait GradientEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gradient at `(x, y, z)`, divided by the value range of `bounds`.
    ///
    /// Neighbors outside the grid are clamped to the edge. A degenerate
    /// range yields [`Vec3::ZERO`].
    fn gradient(&self, grid: &VoxelGrid, bounds: &ValueBounds, x: usize, y: usize, z: usize)
        -> Vec3;
}

/// `(v[i + 1] - v[i - 1]) / range` along each axis.
#[derive(Debug, Default, Clone, Copy)]
pub struct CentralDifference;

impl GradientEstimator for CentralDifference {
    fn name(&self) -> &'static str {
        "central difference"
    }

    fn gradient(
        &self,
        grid: &VoxelGrid,
        bounds: &ValueBounds,
        x: usize,
        y: usize,
        z: usize,
    ) -> Vec3 {
        if bounds.is_degenerate() {
            return Vec3::ZERO;
        }
        let (x, y, z) = (x as isize, y as isize, z as isize);
        let sample = |dx: isize, dy: isize, dz: isize| grid.get_clamped(x + dx, y + dy, z + dz);

        Vec3::new(
            sample(1, 0, 0) - sample(-1, 0, 0),
            sample(0, 1, 0) - sample(0, -1, 0),
            sample(0, 0, 1) - sample(0, 0, -1),
        ) / bounds.range()
    }
}

/// 3x3x3 Sobel operator, normalized so a linear ramp gives the same
/// result as [`CentralDifference`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Sobel;

const SOBEL_SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];

impl GradientEstimator for Sobel {
    fn name(&self) -> &'static str {
        "sobel"
    }

    fn gradient(
        &self,
        grid: &VoxelGrid,
        bounds: &ValueBounds,
        x: usize,
        y: usize,
        z: usize,
    ) -> Vec3 {
        if bounds.is_degenerate() {
            return Vec3::ZERO;
        }
        let (x, y, z) = (x as isize, y as isize, z as isize);
        let sample = |dx: isize, dy: isize, dz: isize| grid.get_clamped(x + dx, y + dy, z + dz);

        let mut sum = Vec3::ZERO;
        for a in -1..=1_isize {
            for b in -1..=1_isize {
                let w = SOBEL_SMOOTH[(a + 1) as usize] * SOBEL_SMOOTH[(b + 1) as usize];
                sum += w * Vec3::new(
                    sample(1, a, b) - sample(-1, a, b),
                    sample(a, 1, b) - sample(a, -1, b),
                    sample(a, b, 1) - sample(a, b, -1),
                );
            }
        }
        sum / (16.0 * bounds.range())
    }
}

/// Built-in gradient estimators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradientStrategy {
    #[default]
    CentralDifference,
    Sobel,
}

impl GradientStrategy {
    pub fn estimator(self) -> Box<dyn GradientEstimator> {
        match self {
            Self::CentralDifference => Box::new(CentralDifference),
            Self::Sobel => Box::new(Sobel),
        }
    }
}

impl FromStr for GradientStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "central" | "central-difference" => Ok(Self::CentralDifference),
            "sobel" => Ok(Self::Sobel),
            other => Err(format!("unknown gradient estimator '{other}'")),
        }
    }
}

/// Gradient of every voxel, in grid order.
///
/// Slices are processed in parallel; progress is reported once per
/// finished slice.
pub fn compute_gradients(
    grid: &VoxelGrid,
    bounds: &ValueBounds,
    estimator: &dyn GradientEstimator,
    progress: &dyn ProgressHandler,
) -> Vec<Vec3> {
    let [dim_x, dim_y, dim_z] = grid.dims();
    let mut gradients = vec![Vec3::ZERO; grid.len()];
    let finished = AtomicUsize::new(0);

    gradients
        .par_chunks_mut(grid.slice_len())
        .enumerate()
        .for_each(|(z, slice)| {
            for y in 0..dim_y {
                for x in 0..dim_x {
                    slice[x + y * dim_x] = estimator.gradient(grid, bounds, x, y, z);
                }
            }
            let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report_progress(done, dim_z, "Computing gradients");
        });

    gradients
}
