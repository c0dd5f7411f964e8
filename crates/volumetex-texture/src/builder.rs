//! Density and gradient texture builders.
//!
//! A build runs through weighted stages reported to a [`ProgressHandler`]:
//!
//! | Texture  | Bounds | Gradient | Pack |
//! |----------|--------|----------|------|
//! | density  | 0.2    | -        | 0.8  |
//! | gradient | 0.2    | 0.6      | 0.2  |

use std::time::Instant;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use volumetex_core::{BoundsCache, ProgressHandler, ValueBounds, VoxelGrid};

use crate::atlas::{AtlasLayout, AtlasPacker, PackPath};
use crate::config::TextureBuildConfig;
use crate::device::{TextureDescriptor, TextureDevice};
use crate::encoding::TextureFormat;
use crate::error::{Result, TextureError};
use crate::gradient::{compute_gradients, GradientEstimator};

/// Stage of a texture build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Bounds,
    Gradient,
    Pack,
}

impl BuildStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Bounds => "Calculating value bounds",
            Self::Gradient => "Computing gradients",
            Self::Pack => "Packing atlas",
        }
    }
}

/// Kind of texture derived from a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// One channel: normalized value.
    Density,
    /// Four channels: gradient xyz and normalized value.
    Gradient,
}

impl TextureKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Density => "density",
            Self::Gradient => "gradient",
        }
    }
}

/// A finished atlas texture and what it was built from.
#[derive(Debug)]
pub struct VolumeTexture<T> {
    texture: T,
    kind: TextureKind,
    layout: AtlasLayout,
    bounds: ValueBounds,
    format: TextureFormat,
    pack_path: PackPath,
}

impl<T> VolumeTexture<T> {
    pub const fn texture(&self) -> &T {
        &self.texture
    }

    pub fn into_texture(self) -> T {
        self.texture
    }

    pub const fn kind(&self) -> TextureKind {
        self.kind
    }

    pub const fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// Bounds used for normalization.
    pub const fn bounds(&self) -> ValueBounds {
        self.bounds
    }

    pub const fn format(&self) -> TextureFormat {
        self.format
    }

    /// Whether the atlas had to be written texel by texel.
    pub fn used_fallback(&self) -> bool {
        self.pack_path == PackPath::Direct
    }

    pub const fn pack_path(&self) -> PackPath {
        self.pack_path
    }
}

fn run_stage<R>(
    progress: &dyn ProgressHandler,
    kind: TextureKind,
    stage: BuildStage,
    weight: f32,
    work: impl FnOnce() -> R,
) -> R {
    debug!("Building {} texture: {}", kind.label(), stage.label());
    progress.start_stage(weight, stage.label());
    let result = work();
    progress.end_stage();
    result
}

fn resolve_bounds(
    grid: &VoxelGrid,
    bounds: &BoundsCache,
    kind: TextureKind,
    weight: f32,
    progress: &dyn ProgressHandler,
) -> Result<ValueBounds> {
    if grid.is_empty() {
        return Err(TextureError::EmptyDataset);
    }
    let bounds = run_stage(progress, kind, BuildStage::Bounds, weight, || {
        bounds.get_or_compute(grid, progress)
    });
    if !bounds.is_valid() {
        return Err(TextureError::EmptyDataset);
    }
    if bounds.is_degenerate() {
        warn!(
            "Value range of {} is degenerate, {} texture will be flat",
            bounds.min,
            kind.label()
        );
    }
    Ok(bounds)
}

/// Builds the single channel density atlas.
#[derive(Debug, Clone)]
pub struct VolumeTextureBuilder {
    force_full_float: bool,
    scratch_budget: Option<usize>,
}

impl VolumeTextureBuilder {
    pub const BOUNDS_WEIGHT: f32 = 0.2;
    pub const PACK_WEIGHT: f32 = 0.8;

    pub const fn new(config: &TextureBuildConfig) -> Self {
        Self {
            force_full_float: config.force_full_float,
            scratch_budget: config.scratch_budget_bytes,
        }
    }

    pub fn build<D: TextureDevice>(
        &self,
        device: &D,
        grid: &VoxelGrid,
        bounds: &BoundsCache,
        progress: &dyn ProgressHandler,
    ) -> Result<VolumeTexture<D::Texture>> {
        let kind = TextureKind::Density;
        let started = Instant::now();
        let bounds = resolve_bounds(grid, bounds, kind, Self::BOUNDS_WEIGHT, progress)?;

        let encoding = device.capabilities().preferred_encoding(self.force_full_float);
        let format = TextureFormat::single_channel(encoding);
        let layout = AtlasLayout::for_grid(grid);
        let mut texture = device.create_texture(TextureDescriptor::new(
            kind.label(),
            layout.width(),
            layout.height(),
            format,
        ))?;

        let packer = AtlasPacker::new(layout, format).with_scratch_budget(self.scratch_budget);
        let data = grid.data();
        let pack_path = run_stage(progress, kind, BuildStage::Pack, Self::PACK_WEIGHT, || {
            packer.pack_into(
                &mut texture,
                |x, y, z| {
                    let value = data[grid.index(x as usize, y as usize, z as usize)];
                    [bounds.normalize(value), 0.0, 0.0, 0.0]
                },
                progress,
            )
        })?;

        info!(
            "Built {}x{} {:?} density atlas ({}x{} tiles) in {:.2?}",
            layout.width(),
            layout.height(),
            format,
            layout.tiles_x,
            layout.tiles_y,
            started.elapsed()
        );

        Ok(VolumeTexture {
            texture,
            kind,
            layout,
            bounds,
            format,
            pack_path,
        })
    }
}

/// Builds the four channel gradient atlas.
pub struct GradientTextureBuilder<'a> {
    estimator: &'a dyn GradientEstimator,
    force_full_float: bool,
    scratch_budget: Option<usize>,
}

impl<'a> GradientTextureBuilder<'a> {
    pub const BOUNDS_WEIGHT: f32 = 0.2;
    pub const GRADIENT_WEIGHT: f32 = 0.6;
    pub const PACK_WEIGHT: f32 = 0.2;

    pub const fn new(config: &TextureBuildConfig, estimator: &'a dyn GradientEstimator) -> Self {
        Self {
            estimator,
            force_full_float: config.force_full_float,
            scratch_budget: config.scratch_budget_bytes,
        }
    }

    pub fn build<D: TextureDevice>(
        &self,
        device: &D,
        grid: &VoxelGrid,
        bounds: &BoundsCache,
        progress: &dyn ProgressHandler,
    ) -> Result<VolumeTexture<D::Texture>> {
        let kind = TextureKind::Gradient;
        let started = Instant::now();
        let bounds = resolve_bounds(grid, bounds, kind, Self::BOUNDS_WEIGHT, progress)?;

        let gradients: Vec<Vec3> = run_stage(
            progress,
            kind,
            BuildStage::Gradient,
            Self::GRADIENT_WEIGHT,
            || compute_gradients(grid, &bounds, self.estimator, progress),
        );

        let encoding = device.capabilities().preferred_encoding(self.force_full_float);
        let format = TextureFormat::rgba(encoding);
        let layout = AtlasLayout::for_grid(grid);
        let mut texture = device.create_texture(TextureDescriptor::new(
            kind.label(),
            layout.width(),
            layout.height(),
            format,
        ))?;

        let packer = AtlasPacker::new(layout, format).with_scratch_budget(self.scratch_budget);
        let data = grid.data();
        let pack_path = run_stage(progress, kind, BuildStage::Pack, Self::PACK_WEIGHT, || {
            packer.pack_into(
                &mut texture,
                |x, y, z| {
                    let index = grid.index(x as usize, y as usize, z as usize);
                    let g = gradients[index];
                    [g.x, g.y, g.z, bounds.normalize(data[index])]
                },
                progress,
            )
        })?;

        info!(
            "Built {}x{} {:?} gradient atlas using {} in {:.2?}",
            layout.width(),
            layout.height(),
            format,
            self.estimator.name(),
            started.elapsed()
        );

        Ok(VolumeTexture {
            texture,
            kind,
            layout,
            bounds,
            format,
            pack_path,
        })
    }
}
