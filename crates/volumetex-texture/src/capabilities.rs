//! Texture device capability description.

use serde::{Deserialize, Serialize};

use crate::encoding::TextureEncoding;

/// Capabilities of the device textures are created on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Device name
    pub device_name: String,
    /// Whether 16-bit float textures (R16Float, Rgba16Float) can be sampled
    pub supports_half_float: bool,
    /// Largest width or height of a 2D texture
    pub max_texture_dimension: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            device_name: "headless".to_string(),
            supports_half_float: true,
            max_texture_dimension: 16384,
        }
    }
}

impl DeviceCapabilities {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    /// Set half float support.
    #[must_use]
    pub const fn with_half_float(mut self, supported: bool) -> Self {
        self.supports_half_float = supported;
        self
    }

    /// Set the largest texture dimension.
    #[must_use]
    pub const fn with_max_texture_dimension(mut self, dimension: u32) -> Self {
        self.max_texture_dimension = dimension;
        self
    }

    /// Encoding to use for new textures.
    ///
    /// Half precision is preferred whenever the device supports it, unless
    /// `force_full_float` is set.
    pub const fn preferred_encoding(&self, force_full_float: bool) -> TextureEncoding {
        if self.supports_half_float && !force_full_float {
            TextureEncoding::Half
        } else {
            TextureEncoding::Full
        }
    }

    /// Check if a texture of the given size can be created.
    pub const fn fits(&self, width: u32, height: u32) -> bool {
        width > 0
            && height > 0
            && width <= self.max_texture_dimension
            && height <= self.max_texture_dimension
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} - half float: {} - max texture {}px",
            self.device_name,
            if self.supports_half_float { "yes" } else { "no" },
            self.max_texture_dimension,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_selection() {
        let caps = DeviceCapabilities::default();
        assert_eq!(caps.preferred_encoding(false), TextureEncoding::Half);
        assert_eq!(caps.preferred_encoding(true), TextureEncoding::Full);

        let caps = caps.with_half_float(false);
        assert_eq!(caps.preferred_encoding(false), TextureEncoding::Full);
    }

    #[test]
    fn size_limits() {
        let caps = DeviceCapabilities::new("test").with_max_texture_dimension(256);
        assert!(caps.fits(256, 1));
        assert!(!caps.fits(257, 1));
        assert!(!caps.fits(0, 16));
        assert!(caps.summary().starts_with("test"));
    }
}
