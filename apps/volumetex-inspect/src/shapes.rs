//! Synthetic scalar volumes.

use std::str::FromStr;

use glam::Vec3;
use volumetex_core::{Result, VoxelGrid};

/// Procedural test volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Signed distance to a sphere filling the box, positive inside.
    Sphere,
    /// Signed distance to a torus around the Z axis, positive inside.
    Torus,
    /// Value rising linearly along X.
    Ramp,
}

impl FromStr for Shape {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sphere" => Ok(Self::Sphere),
            "torus" => Ok(Self::Torus),
            "ramp" => Ok(Self::Ramp),
            other => Err(format!("unknown shape '{other}' (sphere, torus, ramp)")),
        }
    }
}

impl Shape {
    /// Sample the shape on a grid of `dims` voxels.
    pub fn generate(self, dims: [usize; 3]) -> Result<VoxelGrid> {
        let size = Vec3::new(dims[0] as f32, dims[1] as f32, dims[2] as f32);
        let center = (size - Vec3::ONE) * 0.5;
        let radius = center.min_element().max(0.5);

        VoxelGrid::from_fn(dims, |x, y, z| {
            let p = Vec3::new(x as f32, y as f32, z as f32) - center;
            match self {
                Self::Sphere => radius - p.length(),
                Self::Torus => {
                    let ring = radius * 0.6;
                    let tube = radius * 0.3;
                    let q = glam::Vec2::new(p.truncate().length() - ring, p.z);
                    tube - q.length()
                }
                Self::Ramp => x as f32,
            }
        })
    }
}
