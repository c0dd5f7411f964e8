//! Texture preparation for volume rendering.
//!
//! This crate turns a [`VoxelGrid`](volumetex_core::VoxelGrid) into GPU-ready
//! textures:
//! - Z-slice atlas layout and packing into a 2D pixel buffer
//! - Half or full float encodings chosen from device capabilities
//! - Gradient estimation (central difference, Sobel)
//! - Single-flight cached builds on background workers

pub mod atlas;
pub mod builder;
pub mod cache;
pub mod capabilities;
pub mod config;
pub mod dataset;
pub mod device;
pub mod encoding;
pub mod error;
pub mod gradient;
pub mod worker;

pub use atlas::{AtlasLayout, AtlasPacker, AtlasUniforms, PackPath};
pub use builder::{
    BuildStage, GradientTextureBuilder, TextureKind, VolumeTexture, VolumeTextureBuilder,
};
pub use cache::{BuildCache, BuildFuture, Claim, Completion, Flight};
pub use capabilities::DeviceCapabilities;
pub use config::TextureBuildConfig;
pub use dataset::{DatasetMetadata, VolumeDataset};
pub use device::{HeadlessDevice, HeadlessTexture, Texture, TextureDescriptor, TextureDevice};
pub use encoding::{PixelBuffer, PixelData, TextureEncoding, TextureFormat};
pub use error::{Result, TextureError};
pub use gradient::{
    compute_gradients, CentralDifference, GradientEstimator, GradientStrategy, Sobel,
};
pub use worker::BuildWorkers;
