//! Flattened scalar voxel grid.
//!
//! Samples are stored x-fastest: `index = x + y * dim_x + z * dim_x * dim_y`.

use rayon::prelude::*;
use tracing::warn;

use crate::error::{Error, Result};

/// In-bounds offsets of the 2x2x2 block starting at a voxel, keyed by its
/// boundary mask (bit 0: last X index, bit 1: last Y index, bit 2: last Z index).
const NEIGHBOR_OFFSETS: [&[[usize; 3]]; 8] = [
    &[
        [0, 0, 0],
        [1, 0, 0],
        [0, 1, 0],
        [1, 1, 0],
        [0, 0, 1],
        [1, 0, 1],
        [0, 1, 1],
        [1, 1, 1],
    ],
    &[[0, 0, 0], [0, 1, 0], [0, 0, 1], [0, 1, 1]],
    &[[0, 0, 0], [1, 0, 0], [0, 0, 1], [1, 0, 1]],
    &[[0, 0, 0], [0, 0, 1]],
    &[[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]],
    &[[0, 0, 0], [0, 1, 0]],
    &[[0, 0, 0], [1, 0, 0]],
    &[[0, 0, 0]],
];

/// Dense 3D grid of scalar density samples.
///
/// The data array length always equals the product of the dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    dim_x: usize,
    dim_y: usize,
    dim_z: usize,
    data: Vec<f32>,
}

impl VoxelGrid {
    /// Create a grid from dimensions and x-fastest sample data.
    pub fn new(dims: [usize; 3], data: Vec<f32>) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidDimensions(dims));
        }

        let expected = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or(Error::InvalidDimensions(dims))?;
        if data.len() != expected {
            return Err(Error::DataLengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            dim_x: dims[0],
            dim_y: dims[1],
            dim_z: dims[2],
            data,
        })
    }

    /// Create a grid by evaluating `f(x, y, z)` for every voxel.
    pub fn from_fn<F>(dims: [usize; 3], mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    data.push(f(x, y, z));
                }
            }
        }
        Self::new(dims, data)
    }

    /// Create a grid with every voxel set to `value`.
    pub fn filled(dims: [usize; 3], value: f32) -> Result<Self> {
        Self::new(dims, vec![value; dims[0] * dims[1] * dims[2]])
    }

    /// Grid dimensions `[dim_x, dim_y, dim_z]`.
    #[inline]
    pub const fn dims(&self) -> [usize; 3] {
        [self.dim_x, self.dim_y, self.dim_z]
    }

    #[inline]
    pub const fn dim_x(&self) -> usize {
        self.dim_x
    }

    #[inline]
    pub const fn dim_y(&self) -> usize {
        self.dim_y
    }

    #[inline]
    pub const fn dim_z(&self) -> usize {
        self.dim_z
    }

    /// Number of voxels in one Z slice.
    #[inline]
    pub const fn slice_len(&self) -> usize {
        self.dim_x * self.dim_y
    }

    /// Total number of voxels.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the grid holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flattened sample data.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable access to the samples.
    ///
    /// Cached bounds are not invalidated by writes through this slice.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the grid and return its sample data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Linear index of a voxel. Coordinates are not checked.
    #[inline]
    pub const fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.dim_x + z * self.dim_x * self.dim_y
    }

    /// Voxel coordinates of a linear index.
    #[inline]
    pub const fn coords(&self, index: usize) -> [usize; 3] {
        let x = index % self.dim_x;
        let y = (index / self.dim_x) % self.dim_y;
        let z = index / (self.dim_x * self.dim_y);
        [x, y, z]
    }

    /// Check if a coordinate lies inside the grid.
    #[inline]
    pub const fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.dim_x && y < self.dim_y && z < self.dim_z
    }

    fn check(&self, x: usize, y: usize, z: usize) -> Result<()> {
        if self.contains(x, y, z) {
            Ok(())
        } else {
            Err(Error::IndexOutOfRange {
                x,
                y,
                z,
                dims: self.dims(),
            })
        }
    }

    /// Get the sample at a voxel.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Result<f32> {
        self.check(x, y, z)?;
        Ok(self.data[self.index(x, y, z)])
    }

    /// Sample at a voxel with each coordinate clamped into the grid.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize, z: isize) -> f32 {
        let cx = x.clamp(0, self.dim_x as isize - 1) as usize;
        let cy = y.clamp(0, self.dim_y as isize - 1) as usize;
        let cz = z.clamp(0, self.dim_z as isize - 1) as usize;
        self.data[self.index(cx, cy, cz)]
    }

    /// Average of the 2x2x2 block starting at `(x, y, z)`.
    ///
    /// Along an axis where the coordinate is the last index only the
    /// in-bounds samples take part: 8, 4, 2 or 1 of them depending on how
    /// many axes sit on the boundary.
    pub fn average_neighbor_cell(&self, x: usize, y: usize, z: usize) -> Result<f32> {
        self.check(x, y, z)?;
        Ok(self.average_block(x, y, z))
    }

    #[inline]
    fn boundary_mask(&self, x: usize, y: usize, z: usize) -> usize {
        usize::from(x + 1 == self.dim_x)
            | usize::from(y + 1 == self.dim_y) << 1
            | usize::from(z + 1 == self.dim_z) << 2
    }

    fn average_block(&self, x: usize, y: usize, z: usize) -> f32 {
        let offsets = NEIGHBOR_OFFSETS[self.boundary_mask(x, y, z)];
        let sum: f32 = offsets
            .iter()
            .map(|[dx, dy, dz]| self.data[self.index(x + dx, y + dy, z + dz)])
            .sum();
        sum / offsets.len() as f32
    }

    /// Halve the resolution along every axis.
    ///
    /// New dimensions are `ceil(dim / 2)`; each output voxel is the rounded
    /// (half away from zero) average of its source block.
    pub fn downscale(&self) -> Self {
        let dims = [
            self.dim_x.div_ceil(2),
            self.dim_y.div_ceil(2),
            self.dim_z.div_ceil(2),
        ];
        let slice_len = dims[0] * dims[1];
        let mut data = vec![0.0; slice_len * dims[2]];

        data.par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(z, slice)| {
                for y in 0..dims[1] {
                    for x in 0..dims[0] {
                        slice[x + y * dims[0]] = self.average_block(x * 2, y * 2, z * 2).round();
                    }
                }
            });

        Self {
            dim_x: dims[0],
            dim_y: dims[1],
            dim_z: dims[2],
            data,
        }
    }

    /// Downscale repeatedly until no axis exceeds `max_dimension`.
    ///
    /// Returns the number of downscale passes applied.
    pub fn fix_dimensions(&mut self, max_dimension: usize) -> usize {
        let max_dimension = max_dimension.max(1);
        let mut passes = 0;

        while self.dims().iter().any(|&d| d > max_dimension) {
            warn!(
                "Dimensions {:?} exceed the maximum of {}, downscaling by 2",
                self.dims(),
                max_dimension
            );
            *self = self.downscale();
            passes += 1;
        }

        passes
    }
}
