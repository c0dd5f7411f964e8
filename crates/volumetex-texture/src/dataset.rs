//! Volume dataset with cached, lazily built textures.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use glam::{Quat, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use volumetex_core::{BoundsCache, NullProgress, ProgressHandler, ValueBounds, VoxelGrid};

use crate::builder::{GradientTextureBuilder, TextureKind, VolumeTexture, VolumeTextureBuilder};
use crate::cache::{BuildCache, BuildFuture, Claim, Flight};
use crate::config::TextureBuildConfig;
use crate::device::TextureDevice;
use crate::error::Result;
use crate::gradient::GradientEstimator;
use crate::worker::BuildWorkers;

/// Descriptive data carried alongside the samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetMetadata {
    pub name: String,
    /// File the samples were imported from.
    pub file_path: Option<PathBuf>,
    /// Size of one voxel in world units.
    pub scale: Vec3,
    pub rotation: Quat,
}

impl Default for DatasetMetadata {
    fn default() -> Self {
        Self {
            name: "volume".to_string(),
            file_path: None,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
        }
    }
}

impl DatasetMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[must_use]
    pub const fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub const fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }
}

type SharedTexture<D> = Arc<VolumeTexture<<D as TextureDevice>::Texture>>;
type TextureCache<D> = BuildCache<VolumeTexture<<D as TextureDevice>::Texture>>;

struct DatasetInner<D: TextureDevice> {
    metadata: RwLock<DatasetMetadata>,
    grid: RwLock<Arc<VoxelGrid>>,
    bounds: BoundsCache,
    device: Arc<D>,
    config: TextureBuildConfig,
    estimator: RwLock<Arc<dyn GradientEstimator>>,
    density: TextureCache<D>,
    gradient: TextureCache<D>,
}

impl<D: TextureDevice> DatasetInner<D> {
    const fn cache(&self, kind: TextureKind) -> &TextureCache<D> {
        match kind {
            TextureKind::Density => &self.density,
            TextureKind::Gradient => &self.gradient,
        }
    }

    fn build(
        &self,
        kind: TextureKind,
        progress: &dyn ProgressHandler,
    ) -> Result<VolumeTexture<D::Texture>> {
        let grid = self.grid.read().clone();
        match kind {
            TextureKind::Density => VolumeTextureBuilder::new(&self.config).build(
                &*self.device,
                &grid,
                &self.bounds,
                progress,
            ),
            TextureKind::Gradient => {
                let estimator = self.estimator.read().clone();
                GradientTextureBuilder::new(&self.config, &*estimator).build(
                    &*self.device,
                    &grid,
                    &self.bounds,
                    progress,
                )
            }
        }
    }

    /// Run a claimed build and publish its outcome.
    ///
    /// A rebuild queued behind an invalidated build runs next on the same
    /// thread, so builds of one kind never overlap.
    fn run_builds(
        &self,
        kind: TextureKind,
        flight: Arc<Flight<VolumeTexture<D::Texture>>>,
        progress: &dyn ProgressHandler,
    ) {
        let mut flight = flight;
        loop {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.build(kind, progress)));
            let built = match outcome {
                Ok(Ok(texture)) => Some(Arc::new(texture)),
                Ok(Err(err)) => {
                    error!("Failed to build {} texture: {err}", kind.label());
                    None
                }
                Err(_) => {
                    error!("{} texture build panicked", kind.label());
                    None
                }
            };
            let keeps_previous = built.is_none() && flight.previous().is_some();
            let completion = self.cache(kind).complete(&flight, built);
            if keeps_previous {
                info!("Keeping previous {} texture", kind.label());
            }
            match completion.next {
                Some(next) => {
                    debug!("Rebuilding invalidated {} texture", kind.label());
                    flight = next;
                }
                None => break,
            }
        }
    }

    /// Fail `flight` and any rebuild queued behind it.
    fn abandon(&self, kind: TextureKind, flight: Arc<Flight<VolumeTexture<D::Texture>>>) {
        let mut pending = Some(flight);
        while let Some(flight) = pending {
            pending = self.cache(kind).complete(&flight, None).next;
        }
    }
}

/// A scalar volume together with its derived textures.
///
/// Textures are built on first request on background threads. Concurrent
/// requests for the same texture, blocking or async, share one build.
/// A failed or panicking build is logged and the previous texture (if any)
/// is returned instead. Invalidating a texture while it builds queues the
/// rebuild behind the running build.
pub struct VolumeDataset<D: TextureDevice> {
    inner: Arc<DatasetInner<D>>,
    workers: BuildWorkers,
}

impl<D: TextureDevice> VolumeDataset<D> {
    pub fn new(
        grid: VoxelGrid,
        metadata: DatasetMetadata,
        device: Arc<D>,
        config: TextureBuildConfig,
    ) -> Result<Self> {
        let workers = BuildWorkers::spawn(config.worker_threads)?;
        info!(
            "Loaded dataset '{}' {:?} on {}",
            metadata.name,
            grid.dims(),
            device.capabilities().summary()
        );

        let estimator: Arc<dyn GradientEstimator> = Arc::from(config.gradient.estimator());
        Ok(Self {
            inner: Arc::new(DatasetInner {
                metadata: RwLock::new(metadata),
                grid: RwLock::new(Arc::new(grid)),
                bounds: BoundsCache::new(),
                device,
                config,
                estimator: RwLock::new(estimator),
                density: BuildCache::new(),
                gradient: BuildCache::new(),
            }),
            workers,
        })
    }

    pub fn metadata(&self) -> DatasetMetadata {
        self.inner.metadata.read().clone()
    }

    pub fn set_metadata(&self, metadata: DatasetMetadata) {
        *self.inner.metadata.write() = metadata;
    }

    /// Snapshot of the current samples.
    pub fn grid(&self) -> Arc<VoxelGrid> {
        self.inner.grid.read().clone()
    }

    pub fn dims(&self) -> [usize; 3] {
        self.inner.grid.read().dims()
    }

    pub fn config(&self) -> &TextureBuildConfig {
        &self.inner.config
    }

    pub fn device(&self) -> &Arc<D> {
        &self.inner.device
    }

    /// Value bounds, computed on first access.
    pub fn bounds(&self) -> ValueBounds {
        let grid = self.grid();
        self.inner.bounds.get_or_compute(&grid, &NullProgress)
    }

    pub fn min_value(&self) -> f32 {
        self.bounds().min
    }

    pub fn max_value(&self) -> f32 {
        self.bounds().max
    }

    /// Recompute the bounds from the current samples.
    ///
    /// Existing textures keep their old normalization until invalidated.
    pub fn recalculate_bounds(&self) -> ValueBounds {
        let grid = self.grid();
        self.inner.bounds.recalculate(&grid, &NullProgress)
    }

    /// Replace the estimator used by later gradient builds.
    pub fn set_gradient_estimator(&self, estimator: Arc<dyn GradientEstimator>) {
        *self.inner.estimator.write() = estimator;
    }

    /// Halve the resolution of the samples.
    ///
    /// Bounds and cached textures are left untouched; call
    /// [`Self::recalculate_bounds`] and [`Self::invalidate_textures`] to
    /// rebuild them from the new samples.
    pub fn downscale(&self) {
        let mut grid = self.inner.grid.write();
        *grid = Arc::new(grid.downscale());
    }

    /// Downscale until no axis exceeds the configured maximum dimension.
    ///
    /// Returns the number of passes applied. Caches are left untouched,
    /// as with [`Self::downscale`].
    pub fn fix_dimensions(&self) -> usize {
        let max_dimension = self.inner.config.max_dimension;
        let mut grid = self.inner.grid.write();
        if grid.dims().iter().all(|&d| d <= max_dimension) {
            return 0;
        }
        let mut fixed = VoxelGrid::clone(&grid);
        let passes = fixed.fix_dimensions(max_dimension);
        *grid = Arc::new(fixed);
        passes
    }

    /// Mark both textures stale; the next request rebuilds them.
    pub fn invalidate_textures(&self) {
        self.inner.density.invalidate();
        self.inner.gradient.invalidate();
    }

    pub fn invalidate_texture(&self, kind: TextureKind) {
        self.inner.cache(kind).invalidate();
    }

    /// Latest texture of `kind` without triggering a build.
    pub fn cached_texture(&self, kind: TextureKind) -> Option<SharedTexture<D>> {
        self.inner.cache(kind).current()
    }

    pub fn is_building(&self, kind: TextureKind) -> bool {
        self.inner.cache(kind).is_building()
    }

    /// Request a texture, starting a build if none is cached or running.
    pub fn texture_async(
        &self,
        kind: TextureKind,
        progress: Arc<dyn ProgressHandler>,
    ) -> BuildFuture<VolumeTexture<D::Texture>> {
        match self.inner.cache(kind).claim() {
            Claim::Ready(texture) => BuildFuture::ready(Some(texture)),
            Claim::Joined(flight) => BuildFuture::flight(flight),
            Claim::Started(flight) => {
                let inner = Arc::clone(&self.inner);
                let job_flight = flight.clone();
                let submitted = self.workers.submit(move || {
                    inner.run_builds(kind, job_flight, progress.as_ref());
                });
                if let Err(err) = submitted {
                    error!("Could not schedule {} texture build: {err}", kind.label());
                    self.inner.abandon(kind, flight.clone());
                }
                BuildFuture::flight(flight)
            }
        }
    }

    /// Request a texture and block until it is available.
    pub fn texture(
        &self,
        kind: TextureKind,
        progress: Arc<dyn ProgressHandler>,
    ) -> Option<SharedTexture<D>> {
        self.texture_async(kind, progress).wait()
    }

    /// Density texture, built on first use.
    pub fn density_texture(&self) -> Option<SharedTexture<D>> {
        self.texture(TextureKind::Density, Arc::new(NullProgress))
    }

    pub fn density_texture_with_progress(
        &self,
        progress: Arc<dyn ProgressHandler>,
    ) -> Option<SharedTexture<D>> {
        self.texture(TextureKind::Density, progress)
    }

    pub fn density_texture_async(
        &self,
        progress: Arc<dyn ProgressHandler>,
    ) -> BuildFuture<VolumeTexture<D::Texture>> {
        self.texture_async(TextureKind::Density, progress)
    }

    /// Gradient texture, built on first use.
    pub fn gradient_texture(&self) -> Option<SharedTexture<D>> {
        self.texture(TextureKind::Gradient, Arc::new(NullProgress))
    }

    pub fn gradient_texture_with_progress(
        &self,
        progress: Arc<dyn ProgressHandler>,
    ) -> Option<SharedTexture<D>> {
        self.texture(TextureKind::Gradient, progress)
    }

    pub fn gradient_texture_async(
        &self,
        progress: Arc<dyn ProgressHandler>,
    ) -> BuildFuture<VolumeTexture<D::Texture>> {
        self.texture_async(TextureKind::Gradient, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::DeviceCapabilities;
    use crate::device::HeadlessDevice;
    use crate::builder::BuildStage;
    use crate::gradient::CentralDifference;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn sphere(dim: usize) -> VoxelGrid {
        let center = (dim as f32 - 1.0) / 2.0;
        VoxelGrid::from_fn([dim, dim, dim], |x, y, z| {
            let p = Vec3::new(x as f32, y as f32, z as f32) - Vec3::splat(center);
            center - p.length()
        })
        .unwrap()
    }

    fn dataset(grid: VoxelGrid, device: Arc<HeadlessDevice>) -> VolumeDataset<HeadlessDevice> {
        VolumeDataset::new(
            grid,
            DatasetMetadata::new("sphere"),
            device,
            TextureBuildConfig::default(),
        )
        .unwrap()
    }

    struct PanickingEstimator;

    impl GradientEstimator for PanickingEstimator {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn gradient(&self, _: &VoxelGrid, _: &ValueBounds, _: usize, _: usize, _: usize) -> Vec3 {
            panic!("estimator failure");
        }
    }

    #[test]
    fn metadata_defaults() {
        let metadata = DatasetMetadata::new("ct")
            .with_file_path("/data/ct.raw")
            .with_scale(Vec3::new(0.5, 0.5, 1.0));
        assert_eq!(metadata.name, "ct");
        assert_eq!(metadata.rotation, Quat::IDENTITY);
        assert_eq!(metadata.file_path, Some(PathBuf::from("/data/ct.raw")));
    }

    #[test]
    fn sync_and_async_requests_share_one_build() {
        let device = Arc::new(HeadlessDevice::default());
        let dataset = Arc::new(dataset(sphere(32), device.clone()));

        let pending = dataset.density_texture_async(Arc::new(NullProgress));
        let blocking = {
            let dataset = dataset.clone();
            thread::spawn(move || dataset.density_texture())
        };

        let from_async = pollster::block_on(pending).unwrap();
        let from_sync = blocking.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&from_async, &from_sync));
        assert_eq!(device.textures_created(), 1);

        // Later requests hit the cache
        let again = dataset.density_texture().unwrap();
        assert!(Arc::ptr_eq(&again, &from_sync));
        assert_eq!(device.textures_created(), 1);
    }

    #[test]
    fn textures_are_cached_independently() {
        let device = Arc::new(HeadlessDevice::default());
        let dataset = dataset(sphere(8), device.clone());

        assert!(dataset.cached_texture(TextureKind::Gradient).is_none());
        let density = dataset.density_texture().unwrap();
        let gradient = dataset.gradient_texture().unwrap();
        assert_eq!(density.kind(), TextureKind::Density);
        assert_eq!(gradient.kind(), TextureKind::Gradient);
        assert_eq!(device.textures_created(), 2);
        assert!(!dataset.is_building(TextureKind::Density));
    }

    #[test]
    fn invalidation_rebuilds() {
        let device = Arc::new(HeadlessDevice::default());
        let dataset = dataset(sphere(8), device.clone());

        let first = dataset.density_texture().unwrap();
        dataset.invalidate_textures();
        assert!(Arc::ptr_eq(
            &dataset.cached_texture(TextureKind::Density).unwrap(),
            &first
        ));

        let second = dataset.density_texture().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(device.textures_created(), 2);
    }

    /// Tracks how many builds are inside the bounds stage at once.
    #[derive(Default)]
    struct OverlapProgress {
        active: AtomicUsize,
        peak: AtomicUsize,
        entered: AtomicUsize,
    }

    impl ProgressHandler for OverlapProgress {
        fn start_stage(&self, _weight: f32, label: &str) {
            if label != BuildStage::Bounds.label() {
                return;
            }
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.entered.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        fn report_progress(&self, _: usize, _: usize, _: &str) {}

        fn end_stage(&self) {}
    }

    #[test]
    fn invalidation_during_build_queues_rebuild() {
        let device = Arc::new(HeadlessDevice::default());
        let dataset = dataset(sphere(8), device.clone());
        let progress = Arc::new(OverlapProgress::default());

        let first = dataset.density_texture_async(progress.clone());
        dataset.invalidate_texture(TextureKind::Density);
        let second = dataset.density_texture_async(progress.clone());
        let third = dataset.density_texture_async(progress.clone());

        let first = pollster::block_on(first).unwrap();
        let second = pollster::block_on(second).unwrap();
        let third = pollster::block_on(third).unwrap();

        assert_eq!(progress.peak.load(Ordering::SeqCst), 1);
        assert_eq!(progress.entered.load(Ordering::SeqCst), 2);
        assert_eq!(device.textures_created(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert!(Arc::ptr_eq(&dataset.density_texture().unwrap(), &second));
        assert!(!dataset.is_building(TextureKind::Density));
    }

    #[test]
    fn failed_build_returns_nothing_without_previous() {
        let device = Arc::new(HeadlessDevice::new(
            DeviceCapabilities::default().with_max_texture_dimension(16),
        ));
        let dataset = dataset(sphere(32), device);
        assert!(dataset.density_texture().is_none());
        assert!(dataset.cached_texture(TextureKind::Density).is_none());
    }

    #[test]
    fn panicking_build_returns_previous_texture() {
        let dataset = dataset(sphere(8), Arc::new(HeadlessDevice::default()));
        dataset.set_gradient_estimator(Arc::new(CentralDifference));
        let previous = dataset.gradient_texture().unwrap();

        dataset.invalidate_texture(TextureKind::Gradient);
        dataset.set_gradient_estimator(Arc::new(PanickingEstimator));
        let after_failure = dataset.gradient_texture().unwrap();
        assert!(Arc::ptr_eq(&previous, &after_failure));

        // Workers survive and a later build succeeds
        dataset.set_gradient_estimator(Arc::new(CentralDifference));
        let rebuilt = dataset.gradient_texture().unwrap();
        assert!(!Arc::ptr_eq(&previous, &rebuilt));
    }

    #[test]
    fn fix_dimensions_swaps_grid() {
        let config = TextureBuildConfig::default().with_max_dimension(8);
        let dataset = VolumeDataset::new(
            sphere(20),
            DatasetMetadata::default(),
            Arc::new(HeadlessDevice::default()),
            config,
        )
        .unwrap();

        let before = dataset.grid();
        assert_eq!(dataset.fix_dimensions(), 2);
        assert_eq!(dataset.dims(), [5, 5, 5]);
        assert_eq!(before.dims(), [20, 20, 20]);
        assert_eq!(dataset.fix_dimensions(), 0);

        dataset.downscale();
        assert_eq!(dataset.dims(), [3, 3, 3]);
    }

    #[test]
    fn bounds_are_lazy_and_recalculated() {
        let dataset = dataset(sphere(9), Arc::new(HeadlessDevice::default()));
        let bounds = dataset.bounds();
        assert_eq!(bounds.max, 4.0);
        assert_eq!(dataset.max_value(), 4.0);
        assert!(dataset.min_value() < 0.0);

        dataset.downscale();
        assert_eq!(dataset.bounds(), bounds);
        assert_ne!(dataset.recalculate_bounds(), bounds);
    }
}
