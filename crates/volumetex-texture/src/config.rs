//! Texture build configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;
use volumetex_core::constants::MAX_DIMENSION;

use crate::gradient::GradientStrategy;

/// Environment variable forcing 32-bit float textures.
pub const ENV_FORCE_FULL_FLOAT: &str = "VOLUMETEX_FORCE_FULL_FLOAT";
/// Environment variable limiting the scratch pixel buffer, in MiB.
pub const ENV_SCRATCH_BUDGET_MB: &str = "VOLUMETEX_SCRATCH_BUDGET_MB";
/// Environment variable setting the number of build workers.
pub const ENV_WORKER_THREADS: &str = "VOLUMETEX_WORKER_THREADS";

/// Configuration for texture builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureBuildConfig {
    /// Largest allowed grid dimension before downscaling.
    pub max_dimension: usize,
    /// Number of background build threads.
    pub worker_threads: usize,
    /// Use 32-bit floats even when the device supports half floats.
    pub force_full_float: bool,
    /// Upper bound for the scratch pixel buffer. `None` means unbounded.
    /// Builds that exceed it write texels directly into the texture.
    pub scratch_budget_bytes: Option<usize>,
    /// Gradient estimator used for gradient textures.
    pub gradient: GradientStrategy,
}

impl Default for TextureBuildConfig {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            worker_threads: 2,
            force_full_float: false,
            scratch_budget_bytes: None,
            gradient: GradientStrategy::CentralDifference,
        }
    }
}

impl TextureBuildConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment variable name.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_FORCE_FULL_FLOAT) {
            match parse_flag(&value) {
                Some(flag) => self.force_full_float = flag,
                None => warn!("Ignoring {ENV_FORCE_FULL_FLOAT}={value}: expected a boolean"),
            }
        }
        if let Some(value) = lookup(ENV_SCRATCH_BUDGET_MB) {
            match value.trim().parse::<usize>() {
                Ok(mb) => self.scratch_budget_bytes = Some(mb.saturating_mul(1024 * 1024)),
                Err(_) => warn!("Ignoring {ENV_SCRATCH_BUDGET_MB}={value}: expected megabytes"),
            }
        }
        if let Some(value) = lookup(ENV_WORKER_THREADS) {
            match value.trim().parse::<usize>() {
                Ok(threads) if threads > 0 => self.worker_threads = threads,
                _ => warn!("Ignoring {ENV_WORKER_THREADS}={value}: expected a positive count"),
            }
        }
        self
    }

    /// Set the largest allowed grid dimension.
    #[must_use]
    pub const fn with_max_dimension(mut self, max_dimension: usize) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Set the number of build threads.
    #[must_use]
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Force 32-bit float textures.
    #[must_use]
    pub const fn with_force_full_float(mut self, force: bool) -> Self {
        self.force_full_float = force;
        self
    }

    /// Limit the scratch pixel buffer.
    #[must_use]
    pub const fn with_scratch_budget(mut self, bytes: Option<usize>) -> Self {
        self.scratch_budget_bytes = bytes;
        self
    }

    /// Set the gradient estimator.
    #[must_use]
    pub const fn with_gradient(mut self, gradient: GradientStrategy) -> Self {
        self.gradient = gradient;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
