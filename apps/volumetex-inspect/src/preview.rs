//! PNG previews of atlas textures.

use std::path::Path;

use anyhow::{Context, Result};
use glam::Vec3;
use image::{ImageBuffer, Luma, Rgb};
use tracing::info;
use volumetex_texture::{HeadlessTexture, VolumeTexture};

/// Convert a `0..=1` value to an 8-bit channel.
fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Image row for atlas row `v`; atlas rows start at the bottom.
const fn flip(height: u32, v: u32) -> u32 {
    height - 1 - v
}

/// Grayscale image of a density atlas.
pub fn density_image(texture: &VolumeTexture<HeadlessTexture>) -> ImageBuffer<Luma<u8>, Vec<u8>> {
    let atlas = texture.texture();
    let (width, height) = (atlas.width(), atlas.height());
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([to_u8(atlas.texel(x, flip(height, y))[0])])
    })
}

/// Gradient directions as colors, `(n + 1) / 2` per channel.
pub fn gradient_image(texture: &VolumeTexture<HeadlessTexture>) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let atlas = texture.texture();
    let (width, height) = (atlas.width(), atlas.height());
    ImageBuffer::from_fn(width, height, |x, y| {
        let [gx, gy, gz, _] = atlas.texel(x, flip(height, y));
        let color = Vec3::new(gx, gy, gz).normalize_or_zero() * 0.5 + Vec3::splat(0.5);
        Rgb([to_u8(color.x), to_u8(color.y), to_u8(color.z)])
    })
}

pub fn save_density(texture: &VolumeTexture<HeadlessTexture>, path: &Path) -> Result<()> {
    density_image(texture)
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Saved density preview to {}", path.display());
    Ok(())
}

pub fn save_gradient(texture: &VolumeTexture<HeadlessTexture>, path: &Path) -> Result<()> {
    gradient_image(texture)
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Saved gradient preview to {}", path.display());
    Ok(())
}
