//! Texel encodings and the scratch pixel buffer.

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TextureError};

/// Float precision of texture channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureEncoding {
    /// IEEE 754 binary16
    Half,
    /// IEEE 754 binary32
    Full,
}

impl TextureEncoding {
    pub const fn bytes_per_channel(self) -> usize {
        match self {
            Self::Half => 2,
            Self::Full => 4,
        }
    }

    /// Round `value` to what this encoding can store.
    #[inline]
    pub fn quantize(self, value: f32) -> f32 {
        match self {
            Self::Half => f16::from_f32(value).to_f32(),
            Self::Full => value,
        }
    }

    /// Worst-case error of a stored value in `0..=1`.
    pub const fn tolerance(self) -> f32 {
        match self {
            Self::Half => 1e-3,
            Self::Full => 1e-6,
        }
    }
}

/// Pixel format of a 2D texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    R16Float,
    R32Float,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    /// Single channel format for `encoding`.
    pub const fn single_channel(encoding: TextureEncoding) -> Self {
        match encoding {
            TextureEncoding::Half => Self::R16Float,
            TextureEncoding::Full => Self::R32Float,
        }
    }

    /// Four channel format for `encoding`.
    pub const fn rgba(encoding: TextureEncoding) -> Self {
        match encoding {
            TextureEncoding::Half => Self::Rgba16Float,
            TextureEncoding::Full => Self::Rgba32Float,
        }
    }

    pub const fn channels(self) -> usize {
        match self {
            Self::R16Float | Self::R32Float => 1,
            Self::Rgba16Float | Self::Rgba32Float => 4,
        }
    }

    pub const fn encoding(self) -> TextureEncoding {
        match self {
            Self::R16Float | Self::Rgba16Float => TextureEncoding::Half,
            Self::R32Float | Self::Rgba32Float => TextureEncoding::Full,
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        self.channels() * self.encoding().bytes_per_channel()
    }
}

/// Channel storage of a [`PixelBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    Half(Vec<f16>),
    Full(Vec<f32>),
}

/// CPU-side pixel buffer in a texture's native format, row-major from `v = 0`.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    format: TextureFormat,
    width: u32,
    height: u32,
    data: PixelData,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer.
    ///
    /// Fails with [`TextureError::AllocationFailed`] when the allocator
    /// refuses the request or when it exceeds `budget_bytes`.
    pub fn try_new(
        format: TextureFormat,
        width: u32,
        height: u32,
        budget_bytes: Option<usize>,
    ) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|texels| texels.checked_mul(format.channels()))
            .ok_or_else(|| {
                TextureError::AllocationFailed(format!("{width}x{height} {format:?} overflows"))
            })?;
        let bytes = len.saturating_mul(format.encoding().bytes_per_channel());

        if let Some(budget) = budget_bytes {
            if bytes > budget {
                return Err(TextureError::AllocationFailed(format!(
                    "{bytes} bytes exceeds scratch budget of {budget} bytes"
                )));
            }
        }

        let data = match format.encoding() {
            TextureEncoding::Half => PixelData::Half(zeroed(len, f16::ZERO)?),
            TextureEncoding::Full => PixelData::Full(zeroed(len, 0.0)?),
        };

        Ok(Self {
            format,
            width,
            height,
            data,
        })
    }

    pub const fn format(&self) -> TextureFormat {
        self.format
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn data(&self) -> &PixelData {
        &self.data
    }

    /// Store the first `channels` components of `texel` at `(u, v)`.
    #[inline]
    pub fn set_texel(&mut self, u: u32, v: u32, texel: [f32; 4]) {
        let channels = self.format.channels();
        let base = self.offset(u, v);
        match &mut self.data {
            PixelData::Half(data) => {
                for (dst, &src) in data[base..base + channels].iter_mut().zip(&texel) {
                    *dst = f16::from_f32(src);
                }
            }
            PixelData::Full(data) => {
                data[base..base + channels].copy_from_slice(&texel[..channels]);
            }
        }
    }

    /// Read the texel at `(u, v)`. Missing channels read as 0.
    pub fn texel(&self, u: u32, v: u32) -> [f32; 4] {
        let channels = self.format.channels();
        let base = self.offset(u, v);
        let mut texel = [0.0; 4];
        match &self.data {
            PixelData::Half(data) => {
                for (dst, src) in texel.iter_mut().zip(&data[base..base + channels]) {
                    *dst = src.to_f32();
                }
            }
            PixelData::Full(data) => {
                texel[..channels].copy_from_slice(&data[base..base + channels]);
            }
        }
        texel
    }

    /// Raw bytes ready for upload.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            PixelData::Half(data) => bytemuck::cast_slice(data),
            PixelData::Full(data) => bytemuck::cast_slice(data),
        }
    }

    #[inline]
    fn offset(&self, u: u32, v: u32) -> usize {
        debug_assert!(u < self.width && v < self.height);
        (u as usize + v as usize * self.width as usize) * self.format.channels()
    }
}

fn zeroed<T: Copy>(len: usize, zero: T) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|err| TextureError::AllocationFailed(err.to_string()))?;
    data.resize(len, zero);
    Ok(data)
}
