//! Z-slice atlas layout and packing.
//!
//! A volume of `dim_x * dim_y * dim_z` samples is stored as a 2D texture of
//! `tiles_x * tiles_y` tiles. Slice `z` occupies tile `(z % tiles_x, z / tiles_x)`,
//! so voxel `(x, y, z)` lands on pixel
//! `(x + (z % tiles_x) * dim_x, y + (z / tiles_x) * dim_y)`.
//! Tiles past the last slice stay zero.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use volumetex_core::{ProgressHandler, VoxelGrid};

use crate::device::Texture;
use crate::encoding::{PixelBuffer, TextureFormat};
use crate::error::{Result, TextureError};

/// Tile arrangement of a volume inside a 2D atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtlasLayout {
    pub dim_x: u32,
    pub dim_y: u32,
    pub dim_z: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

/// Layout parameters as laid out for a shader uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AtlasUniforms {
    /// Volume dimensions (x, y, z, unused).
    pub dims: [u32; 4],
    /// Tiles per row, tile rows, atlas width, atlas height.
    pub tiles: [u32; 4],
}

impl AtlasLayout {
    /// Layout for a volume of the given dimensions.
    ///
    /// `tiles_x = floor(sqrt(dim_z))`, `tiles_y = ceil(dim_z / tiles_x)`.
    pub fn new(dims: [usize; 3]) -> Self {
        let [dim_x, dim_y, dim_z] = dims.map(|d| u32::try_from(d.max(1)).unwrap_or(u32::MAX));
        let tiles_x = floor_sqrt(dim_z).max(1);
        let tiles_y = dim_z.div_ceil(tiles_x);
        Self {
            dim_x,
            dim_y,
            dim_z,
            tiles_x,
            tiles_y,
        }
    }

    pub fn for_grid(grid: &VoxelGrid) -> Self {
        Self::new(grid.dims())
    }

    /// Atlas width in pixels.
    pub const fn width(&self) -> u32 {
        self.dim_x * self.tiles_x
    }

    /// Atlas height in pixels.
    pub const fn height(&self) -> u32 {
        self.dim_y * self.tiles_y
    }

    pub const fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Tiles that hold no slice.
    pub const fn unused_tiles(&self) -> u32 {
        self.tile_count() - self.dim_z
    }

    /// Pixel holding voxel `(x, y, z)`.
    #[inline]
    pub const fn pixel_for_voxel(&self, x: u32, y: u32, z: u32) -> (u32, u32) {
        (
            x + (z % self.tiles_x) * self.dim_x,
            y + (z / self.tiles_x) * self.dim_y,
        )
    }

    /// Voxel stored at pixel `(u, v)`, or `None` for unused tiles and
    /// pixels outside the atlas.
    #[inline]
    pub const fn voxel_for_pixel(&self, u: u32, v: u32) -> Option<[u32; 3]> {
        if u >= self.width() || v >= self.height() {
            return None;
        }
        let z = (v / self.dim_y) * self.tiles_x + u / self.dim_x;
        if z >= self.dim_z {
            return None;
        }
        Some([u % self.dim_x, v % self.dim_y, z])
    }

    pub const fn uniforms(&self) -> AtlasUniforms {
        AtlasUniforms {
            dims: [self.dim_x, self.dim_y, self.dim_z, 0],
            tiles: [self.tiles_x, self.tiles_y, self.width(), self.height()],
        }
    }
}

fn floor_sqrt(n: u32) -> u32 {
    let mut root = f64::from(n).sqrt() as u32;
    while root.saturating_mul(root) > n {
        root -= 1;
    }
    while (root + 1).saturating_mul(root + 1) <= n {
        root += 1;
    }
    root
}

/// How an atlas reached the texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackPath {
    /// Packed into a scratch buffer and uploaded at once.
    Bulk,
    /// Written texel by texel because the scratch buffer was unavailable.
    Direct,
}

/// Writes texels produced per voxel into an atlas texture.
#[derive(Clone, Copy, Debug)]
pub struct AtlasPacker {
    layout: AtlasLayout,
    format: TextureFormat,
    scratch_budget: Option<usize>,
}

impl AtlasPacker {
    pub const fn new(layout: AtlasLayout, format: TextureFormat) -> Self {
        Self {
            layout,
            format,
            scratch_budget: None,
        }
    }

    /// Limit the scratch pixel buffer to `bytes`.
    #[must_use]
    pub const fn with_scratch_budget(mut self, bytes: Option<usize>) -> Self {
        self.scratch_budget = bytes;
        self
    }

    pub const fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    pub const fn format(&self) -> TextureFormat {
        self.format
    }

    /// Fill `buffer` tile by tile, one progress step per slice.
    ///
    /// `texel(x, y, z)` yields the value stored for a voxel.
    pub fn pack<F>(&self, buffer: &mut PixelBuffer, texel: F, progress: &dyn ProgressHandler)
    where
        F: Fn(u32, u32, u32) -> [f32; 4],
    {
        let layout = &self.layout;
        let total = layout.dim_z as usize;

        for z in 0..layout.dim_z {
            for y in 0..layout.dim_y {
                for x in 0..layout.dim_x {
                    let (u, v) = layout.pixel_for_voxel(x, y, z);
                    buffer.set_texel(u, v, texel(x, y, z));
                }
            }
            progress.report_progress(z as usize + 1, total, "Packing atlas");
        }
    }

    /// Write every pixel of the atlas straight into `texture` in raster order.
    ///
    /// Unused tiles are written as zero so the result matches [`Self::pack`]
    /// followed by an upload.
    pub fn write_direct<T, F>(
        &self,
        texture: &mut T,
        texel: F,
        progress: &dyn ProgressHandler,
    ) -> Result<()>
    where
        T: Texture + ?Sized,
        F: Fn(u32, u32, u32) -> [f32; 4],
    {
        let layout = &self.layout;
        let height = layout.height();
        let total = height as usize;

        for v in 0..height {
            for u in 0..layout.width() {
                let value = layout
                    .voxel_for_pixel(u, v)
                    .map_or([0.0; 4], |[x, y, z]| texel(x, y, z));
                texture.write_texel(u, v, value)?;
            }
            progress.report_progress(v as usize + 1, total, "Writing atlas");
        }
        texture.flush()
    }

    /// Pack and upload the atlas into `texture`.
    ///
    /// When the scratch buffer cannot be allocated the atlas is written
    /// directly instead; both paths produce the same texels.
    pub fn pack_into<T, F>(
        &self,
        texture: &mut T,
        texel: F,
        progress: &dyn ProgressHandler,
    ) -> Result<PackPath>
    where
        T: Texture + ?Sized,
        F: Fn(u32, u32, u32) -> [f32; 4],
    {
        let (width, height) = (self.layout.width(), self.layout.height());
        match PixelBuffer::try_new(self.format, width, height, self.scratch_budget) {
            Ok(mut buffer) => {
                self.pack(&mut buffer, texel, progress);
                texture.upload(&buffer)?;
                debug!("Uploaded {width}x{height} atlas ({} bytes)", buffer.as_bytes().len());
                Ok(PackPath::Bulk)
            }
            Err(TextureError::AllocationFailed(reason)) => {
                warn!(
                    "Scratch buffer unavailable ({reason}), writing {width}x{height} atlas texel by texel"
                );
                self.write_direct(texture, texel, progress)?;
                Ok(PackPath::Direct)
            }
            Err(err) => Err(err),
        }
    }
}
