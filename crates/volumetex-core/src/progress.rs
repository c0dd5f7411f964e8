//! Staged progress reporting.
//!
//! Long builds report through [`ProgressHandler`]. Work is split into stages
//! with a weight relative to the enclosing stage, so nested stages combine
//! into a single overall fraction.

use parking_lot::Mutex;

/// Receiver of staged progress callbacks.
pub trait ProgressHandler: Send + Sync {
    /// Enter a stage taking `weight` (0..=1) of the enclosing stage.
    fn start_stage(&self, weight: f32, label: &str);

    /// Report `current` of `total` steps done in the innermost stage.
    fn report_progress(&self, current: usize, total: usize, label: &str);

    /// Leave the innermost stage, marking it complete.
    fn end_stage(&self);
}

/// Progress handler that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressHandler for NullProgress {
    fn start_stage(&self, _weight: f32, _label: &str) {}

    fn report_progress(&self, _current: usize, _total: usize, _label: &str) {}

    fn end_stage(&self) {}
}

/// Display side of [`StagedProgress`]: receives the overall fraction.
pub trait ProgressView: Send + Sync {
    fn update_progress(&self, fraction: f32, label: &str);
}

impl<F> ProgressView for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn update_progress(&self, fraction: f32, label: &str) {
        self(fraction, label);
    }
}

#[derive(Debug)]
struct Stage {
    /// Overall progress when the stage started.
    start: f32,
    /// Share of the overall progress this stage covers.
    span: f32,
    label: String,
}

#[derive(Debug, Default)]
struct StageStack {
    stages: Vec<Stage>,
    progress: f32,
}

/// Combines nested weighted stages into one overall fraction in `0..=1`.
///
/// The overall progress never moves backwards.
pub struct StagedProgress<V> {
    view: V,
    state: Mutex<StageStack>,
}

impl<V: ProgressView> StagedProgress<V> {
    /// Create a tracker forwarding to `view`.
    pub fn new(view: V) -> Self {
        Self {
            view,
            state: Mutex::new(StageStack::default()),
        }
    }

    /// Current overall progress.
    pub fn progress(&self) -> f32 {
        self.state.lock().progress
    }

    /// Number of currently open stages.
    pub fn depth(&self) -> usize {
        self.state.lock().stages.len()
    }

    /// Access the view.
    pub fn view(&self) -> &V {
        &self.view
    }
}

impl<V: ProgressView> ProgressHandler for StagedProgress<V> {
    fn start_stage(&self, weight: f32, label: &str) {
        let progress = {
            let mut state = self.state.lock();
            let parent_span = state.stages.last().map_or(1.0, |s| s.span);
            let start = state.progress;
            state.stages.push(Stage {
                start,
                span: parent_span * weight.clamp(0.0, 1.0),
                label: label.to_string(),
            });
            start
        };
        self.view.update_progress(progress, label);
    }

    fn report_progress(&self, current: usize, total: usize, label: &str) {
        let fraction = if total == 0 {
            1.0
        } else {
            (current as f32 / total as f32).min(1.0)
        };

        let progress = {
            let mut state = self.state.lock();
            let target = state
                .stages
                .last()
                .map_or(fraction, |s| s.start + s.span * fraction);
            state.progress = state.progress.max(target);
            state.progress
        };
        self.view.update_progress(progress, label);
    }

    fn end_stage(&self) {
        let update = {
            let mut state = self.state.lock();
            state.stages.pop().map(|stage| {
                state.progress = state.progress.max(stage.start + stage.span);
                (state.progress, stage.label)
            })
        };
        if let Some((progress, label)) = update {
            self.view.update_progress(progress, &label);
        }
    }
}
