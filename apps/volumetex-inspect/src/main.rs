//! Volumetex atlas inspector
//!
//! Generates a synthetic scalar volume, builds its density and gradient
//! atlases on a headless device and writes PNG previews of both.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p volumetex-inspect -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)
//! - `VOLUMETEX_FORCE_FULL_FLOAT`, `VOLUMETEX_SCRATCH_BUDGET_MB`,
//!   `VOLUMETEX_WORKER_THREADS`: build defaults, overridden by flags

mod args;
mod preview;
mod shapes;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use volumetex_core::{ProgressView, StagedProgress};
use volumetex_texture::{DatasetMetadata, HeadlessDevice, VolumeDataset};

use crate::args::InspectArgs;

/// Logs overall progress in 10% steps.
#[derive(Default)]
struct LogView {
    last_decile: AtomicU32,
}

impl ProgressView for LogView {
    fn update_progress(&self, fraction: f32, label: &str) {
        let decile = (fraction.clamp(0.0, 1.0) * 10.0) as u32;
        if self.last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            info!("{:>3.0}% {label}", fraction * 100.0);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = InspectArgs::from_args()?;
    if args.help {
        print_help();
        return Ok(());
    }

    let mut grid = args
        .shape
        .generate(args.dims)
        .context("failed to generate volume")?;
    let passes = grid.fix_dimensions(args.config.max_dimension);
    if passes > 0 {
        info!("Downscaled {passes} time(s) to {:?}", grid.dims());
    }

    let metadata = DatasetMetadata::new(format!("{:?}", args.shape).to_lowercase());
    let device = Arc::new(HeadlessDevice::default());
    let dataset = VolumeDataset::new(grid, metadata, device.clone(), args.config)?;

    let bounds = dataset.bounds();
    info!("Value range {} .. {}", bounds.min, bounds.max);

    // Gradient builds in the background while the density texture is awaited
    let gradient =
        dataset.gradient_texture_async(Arc::new(StagedProgress::new(LogView::default())));
    let density = dataset
        .density_texture_with_progress(Arc::new(StagedProgress::new(LogView::default())))
        .context("density texture build failed")?;
    let gradient = pollster::block_on(gradient).context("gradient texture build failed")?;

    for texture in [&density, &gradient] {
        let layout = texture.layout();
        info!(
            "{:?}: {}x{} {:?}, {}x{} tiles ({} unused), {:?} upload",
            texture.kind(),
            layout.width(),
            layout.height(),
            texture.format(),
            layout.tiles_x,
            layout.tiles_y,
            layout.unused_tiles(),
            texture.pack_path()
        );
    }

    preview::save_density(&density, &PathBuf::from(format!("{}_density.png", args.output)))?;
    preview::save_gradient(&gradient, &PathBuf::from(format!("{}_gradient.png", args.output)))?;
    info!("Created {} textures", device.textures_created());

    Ok(())
}

fn print_help() {
    eprintln!(
        "Volumetex atlas inspector

USAGE:
    cargo run -p volumetex-inspect -- [OPTIONS]

VOLUME OPTIONS:
    -d, --dims <N|XxYxZ>    Volume dimensions (default: 64)
    -s, --shape <SHAPE>     sphere, torus or ramp (default: sphere)
    --max-dim <N>           Downscale until no axis exceeds N (default: 2048)

TEXTURE OPTIONS:
    -g, --gradient <NAME>   Gradient estimator: central or sobel (default: central)
    --full-float            Store 32-bit floats instead of half floats
    --budget-mb <N>         Scratch buffer limit; larger atlases are written texel by texel

OUTPUT:
    -o, --output <PREFIX>   Writes <PREFIX>_density.png and <PREFIX>_gradient.png
                            Default: volume

OTHER:
    -h, --help              Print this help message

EXAMPLES:
    # Torus preview with Sobel gradients
    cargo run -p volumetex-inspect -- --shape torus --gradient sobel

    # Exercise the direct-write path
    cargo run -p volumetex-inspect -- --dims 128 --budget-mb 0
"
    );
}
