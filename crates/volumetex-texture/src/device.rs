//! Texture device abstraction.
//!
//! Builders talk to the graphics API through [`TextureDevice`] and
//! [`Texture`]. Both are `Send + Sync` because builds run on background
//! workers; a backend whose API is bound to one thread marshals the calls
//! itself. [`HeadlessDevice`] keeps texels in memory and is used for
//! offline previews and tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::capabilities::DeviceCapabilities;
use crate::encoding::{PixelBuffer, TextureFormat};
use crate::error::{Result, TextureError};

/// Parameters of a 2D texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }

    /// Total size in bytes.
    pub const fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// A 2D float texture with linear filtering and clamped addressing.
pub trait Texture: Send + Sync {
    fn descriptor(&self) -> &TextureDescriptor;

    /// Replace the whole texture with `pixels`.
    fn upload(&mut self, pixels: &PixelBuffer) -> Result<()>;

    /// Write one texel. Components past the format's channel count are ignored.
    fn write_texel(&mut self, u: u32, v: u32, texel: [f32; 4]) -> Result<()>;

    /// Make texel writes visible to the GPU.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates textures.
pub trait TextureDevice: Send + Sync + 'static {
    type Texture: Texture + 'static;

    fn capabilities(&self) -> &DeviceCapabilities;

    fn create_texture(&self, descriptor: TextureDescriptor) -> Result<Self::Texture>;
}

/// In-memory texture device.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    textures_created: AtomicUsize,
}

impl HeadlessDevice {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            textures_created: AtomicUsize::new(0),
        }
    }

    /// Number of textures created so far.
    pub fn textures_created(&self) -> usize {
        self.textures_created.load(Ordering::SeqCst)
    }
}

impl TextureDevice for HeadlessDevice {
    type Texture = HeadlessTexture;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_texture(&self, descriptor: TextureDescriptor) -> Result<HeadlessTexture> {
        if !self.capabilities.fits(descriptor.width, descriptor.height) {
            return Err(TextureError::TextureCreation(format!(
                "{} is {}x{}, device limit is {}",
                descriptor.label,
                descriptor.width,
                descriptor.height,
                self.capabilities.max_texture_dimension
            )));
        }

        let texels = vec![[0.0; 4]; descriptor.width as usize * descriptor.height as usize];
        self.textures_created.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Created {} texture {}x{} {:?}",
            descriptor.label, descriptor.width, descriptor.height, descriptor.format
        );

        Ok(HeadlessTexture {
            descriptor,
            texels,
            uploads: 0,
            texel_writes: 0,
        })
    }
}

/// Texture owned by [`HeadlessDevice`].
#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    descriptor: TextureDescriptor,
    texels: Vec<[f32; 4]>,
    uploads: usize,
    texel_writes: usize,
}

impl HeadlessTexture {
    /// Stored texel at `(u, v)`, as the GPU would sample it.
    pub fn texel(&self, u: u32, v: u32) -> [f32; 4] {
        self.texels[self.index(u, v)]
    }

    pub const fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub const fn height(&self) -> u32 {
        self.descriptor.height
    }

    /// Number of whole-texture uploads.
    pub const fn uploads(&self) -> usize {
        self.uploads
    }

    /// Number of single texel writes.
    pub const fn texel_writes(&self) -> usize {
        self.texel_writes
    }

    fn index(&self, u: u32, v: u32) -> usize {
        u as usize + v as usize * self.descriptor.width as usize
    }

    fn check_bounds(&self, u: u32, v: u32) -> Result<()> {
        if u < self.descriptor.width && v < self.descriptor.height {
            Ok(())
        } else {
            Err(TextureError::Upload(format!(
                "texel ({u}, {v}) outside {}x{}",
                self.descriptor.width, self.descriptor.height
            )))
        }
    }
}

impl Texture for HeadlessTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, pixels: &PixelBuffer) -> Result<()> {
        let desc = &self.descriptor;
        if pixels.width() != desc.width
            || pixels.height() != desc.height
            || pixels.format() != desc.format
        {
            return Err(TextureError::Upload(format!(
                "{}x{} {:?} buffer does not match {}x{} {:?} texture",
                pixels.width(),
                pixels.height(),
                pixels.format(),
                desc.width,
                desc.height,
                desc.format
            )));
        }

        let width = desc.width;
        for v in 0..desc.height {
            for u in 0..width {
                let index = u as usize + v as usize * width as usize;
                self.texels[index] = pixels.texel(u, v);
            }
        }
        self.uploads += 1;
        Ok(())
    }

    fn write_texel(&mut self, u: u32, v: u32, texel: [f32; 4]) -> Result<()> {
        self.check_bounds(u, v)?;
        let format = self.descriptor.format;
        let encoding = format.encoding();
        let mut stored = [0.0; 4];
        for (dst, &src) in stored.iter_mut().zip(&texel).take(format.channels()) {
            *dst = encoding.quantize(src);
        }
        let index = self.index(u, v);
        self.texels[index] = stored;
        self.texel_writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::TextureEncoding;

    #[test]
    fn create_respects_device_limit() {
        let device =
            HeadlessDevice::new(DeviceCapabilities::default().with_max_texture_dimension(8));
        let ok = device.create_texture(TextureDescriptor::new("a", 8, 8, TextureFormat::R32Float));
        assert!(ok.is_ok());
        let err = device.create_texture(TextureDescriptor::new("b", 9, 1, TextureFormat::R32Float));
        assert!(matches!(err, Err(TextureError::TextureCreation(_))));
        assert_eq!(device.textures_created(), 1);
    }

    #[test]
    fn upload_and_texel_writes_agree() {
        let device = HeadlessDevice::default();
        let format = TextureFormat::rgba(TextureEncoding::Half);
        let mut uploaded = device
            .create_texture(TextureDescriptor::new("a", 2, 2, format))
            .unwrap();
        let mut written = device
            .create_texture(TextureDescriptor::new("b", 2, 2, format))
            .unwrap();

        let texel = [0.1, 0.2, 0.3, 0.4];
        let mut pixels = PixelBuffer::try_new(format, 2, 2, None).unwrap();
        pixels.set_texel(1, 1, texel);
        uploaded.upload(&pixels).unwrap();
        written.write_texel(1, 1, texel).unwrap();

        assert_eq!(uploaded.texel(1, 1), written.texel(1, 1));
        assert_eq!(uploaded.uploads(), 1);
        assert_eq!(written.texel_writes(), 1);
    }

    #[test]
    fn mismatched_upload_is_rejected() {
        let device = HeadlessDevice::default();
        let mut texture = device
            .create_texture(TextureDescriptor::new("a", 2, 2, TextureFormat::R16Float))
            .unwrap();
        let pixels = PixelBuffer::try_new(TextureFormat::R32Float, 2, 2, None).unwrap();
        assert!(matches!(
            texture.upload(&pixels),
            Err(TextureError::Upload(_))
        ));
        assert!(texture.write_texel(2, 0, [0.0; 4]).is_err());
    }
}
