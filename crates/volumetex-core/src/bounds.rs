//! Scalar value bounds of a voxel grid.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::grid::VoxelGrid;
use crate::progress::ProgressHandler;

/// Minimum and maximum sample value.
///
/// The uninitialized value `(+inf, -inf)` means "no data" and must not be
/// treated as an empty range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueBounds {
    pub min: f32,
    pub max: f32,
}

impl Default for ValueBounds {
    fn default() -> Self {
        Self::UNINITIALIZED
    }
}

impl ValueBounds {
    /// Bounds before any sample has been seen.
    pub const UNINITIALIZED: Self = Self {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    #[inline]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Returns true once at least one sample was included.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// `max - min`.
    #[inline]
    pub fn range(&self) -> f32 {
        self.max - self.min
    }

    /// Returns true when normalizing by the range is not meaningful
    /// (flat data, no data, or a non-finite range).
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        let range = self.range();
        !(range > 0.0 && range.is_finite())
    }

    /// Widen the bounds to include `value`. NaN is ignored.
    #[inline]
    pub fn include(&mut self, value: f32) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Union of two bounds.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Map `value` into `0..=1` relative to the bounds.
    ///
    /// A degenerate range maps everything to 0.
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            (value - self.min) / self.range()
        }
    }
}

/// Compute bounds of raw samples, reporting progress once per `chunk_len` samples.
pub fn compute_bounds_of(
    values: &[f32],
    chunk_len: usize,
    progress: &dyn ProgressHandler,
) -> ValueBounds {
    let chunk_len = chunk_len.max(1);
    let total = values.len().div_ceil(chunk_len);
    let mut bounds = ValueBounds::UNINITIALIZED;

    for (i, chunk) in values.chunks(chunk_len).enumerate() {
        for &value in chunk {
            bounds.include(value);
        }
        progress.report_progress(i + 1, total, "Calculating value bounds");
    }

    bounds
}

/// Compute bounds of a grid in one pass, one progress step per Z slice.
pub fn compute_bounds(grid: &VoxelGrid, progress: &dyn ProgressHandler) -> ValueBounds {
    compute_bounds_of(grid.data(), grid.slice_len(), progress)
}

/// Lazily computed, explicitly invalidated bounds.
///
/// Mutating grid data does not refresh the cached value; call
/// [`BoundsCache::recalculate`] after changing samples.
#[derive(Debug, Default)]
pub struct BoundsCache {
    bounds: RwLock<Option<ValueBounds>>,
}

impl BoundsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached bounds, if computed.
    pub fn get(&self) -> Option<ValueBounds> {
        *self.bounds.read()
    }

    /// Cached bounds, computing them from `grid` on first access.
    ///
    /// No lock is held while computing, so `progress` may read the cache.
    /// Concurrent first calls may each compute; the first to finish is kept.
    pub fn get_or_compute(&self, grid: &VoxelGrid, progress: &dyn ProgressHandler) -> ValueBounds {
        if let Some(bounds) = self.get() {
            return bounds;
        }

        let bounds = compute_bounds(grid, progress);
        *self.bounds.write().get_or_insert(bounds)
    }

    /// Recompute the bounds from `grid` and replace the cached value.
    pub fn recalculate(&self, grid: &VoxelGrid, progress: &dyn ProgressHandler) -> ValueBounds {
        let bounds = compute_bounds(grid, progress);
        *self.bounds.write() = Some(bounds);
        bounds
    }

    /// Drop the cached value; the next access recomputes it.
    pub fn invalidate(&self) {
        *self.bounds.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProgress {
        reports: AtomicUsize,
        last_total: AtomicUsize,
    }

    impl ProgressHandler for CountingProgress {
        fn start_stage(&self, _weight: f32, _label: &str) {}

        fn report_progress(&self, current: usize, total: usize, _label: &str) {
            self.reports.fetch_add(1, Ordering::SeqCst);
            assert!(current <= total);
            self.last_total.store(total, Ordering::SeqCst);
        }

        fn end_stage(&self) {}
    }

    #[test]
    fn bounds_of_ramp() {
        let grid =
            VoxelGrid::from_fn([4, 3, 2], |x, y, z| (x + y * 10 + z * 100) as f32 - 5.0).unwrap();
        let bounds = compute_bounds(&grid, &NullProgress);
        assert_eq!(bounds, ValueBounds::new(-5.0, 118.0));
    }

    #[test]
    fn progress_once_per_slice() {
        let grid = VoxelGrid::filled([8, 4, 6], 1.0).unwrap();
        let progress = CountingProgress::default();
        compute_bounds(&grid, &progress);
        assert_eq!(progress.reports.load(Ordering::SeqCst), 6);
        assert_eq!(progress.last_total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn empty_input_stays_uninitialized() {
        let bounds = compute_bounds_of(&[], 16, &NullProgress);
        assert_eq!(bounds, ValueBounds::UNINITIALIZED);
        assert!(!bounds.is_valid());
        assert!(bounds.is_degenerate());
    }

    #[test]
    fn flat_grid_normalizes_to_zero() {
        let grid = VoxelGrid::filled([3, 3, 3], 7.25).unwrap();
        let bounds = compute_bounds(&grid, &NullProgress);
        assert_eq!(bounds.min, 7.25);
        assert_eq!(bounds.max, 7.25);
        assert!(bounds.is_degenerate());

        let normalized = bounds.normalize(7.25);
        assert!(!normalized.is_nan());
        assert_eq!(normalized, 0.0);
    }

    #[test]
    fn nan_does_not_widen() {
        let bounds = compute_bounds_of(&[1.0, f32::NAN, 3.0], 2, &NullProgress);
        assert_eq!(bounds, ValueBounds::new(1.0, 3.0));
    }

    #[test]
    fn normalize_maps_into_unit_range() {
        let bounds = ValueBounds::new(-2.0, 6.0);
        assert_eq!(bounds.normalize(-2.0), 0.0);
        assert_eq!(bounds.normalize(2.0), 0.5);
        assert_eq!(bounds.normalize(6.0), 1.0);
    }

    #[test]
    fn merge_bounds() {
        let merged = ValueBounds::new(0.0, 1.0).merge(ValueBounds::new(-1.0, 0.5));
        assert_eq!(merged, ValueBounds::new(-1.0, 1.0));
        assert_eq!(
            ValueBounds::UNINITIALIZED.merge(ValueBounds::new(2.0, 3.0)),
            ValueBounds::new(2.0, 3.0)
        );
    }

    struct ReadingProgress<'a> {
        cache: &'a BoundsCache,
        reads: AtomicUsize,
    }

    impl ProgressHandler for ReadingProgress<'_> {
        fn start_stage(&self, _weight: f32, _label: &str) {}

        fn report_progress(&self, _current: usize, _total: usize, _label: &str) {
            assert_eq!(self.cache.get(), None);
            self.reads.fetch_add(1, Ordering::SeqCst);
        }

        fn end_stage(&self) {}
    }

    #[test]
    fn progress_can_read_cache_while_computing() {
        let grid = VoxelGrid::from_fn([2, 2, 3], |x, _, z| (x + z) as f32).unwrap();
        let cache = BoundsCache::new();
        let progress = ReadingProgress {
            cache: &cache,
            reads: AtomicUsize::new(0),
        };

        let bounds = cache.get_or_compute(&grid, &progress);
        assert_eq!(bounds, ValueBounds::new(0.0, 3.0));
        assert_eq!(progress.reads.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get(), Some(bounds));
    }

    #[test]
    fn cache_is_lazy_and_explicit() {
        let mut grid = VoxelGrid::filled([2, 2, 2], 1.0).unwrap();
        let cache = BoundsCache::new();
        assert_eq!(cache.get(), None);

        let progress = CountingProgress::default();
        let flat = ValueBounds::new(1.0, 1.0);
        assert_eq!(cache.get_or_compute(&grid, &progress), flat);
        assert_eq!(cache.get_or_compute(&grid, &progress), flat);
        assert_eq!(progress.reports.load(Ordering::SeqCst), 2);

        // Mutation is not picked up until recalculated
        grid.data_mut()[3] = 9.0;
        assert_eq!(cache.get_or_compute(&grid, &NullProgress).max, 1.0);
        assert_eq!(cache.recalculate(&grid, &NullProgress).max, 9.0);

        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
