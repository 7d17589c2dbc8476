//! Shared display timing model and pacing context
//!
//! Everything in here is read on the present thread without locking.
//! Writers (the scheduler's periodic refresh and the sampler thread) store
//! through atomics; readers tolerate values that are one sample stale.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{DisplayTiming, WindowHandle};

/// Lock-free snapshot of the bound display's timing.
///
/// Zeroed until the first successful configuration query. Consumers must
/// treat a zero `total_scanlines` or `refresh_interval_ns` as "model not
/// ready" and skip their computation for that cycle.
#[derive(Debug, Default)]
pub struct DisplayTimingModel {
    total_scanlines: AtomicU32,
    active_scanlines: AtomicU32,
    refresh_interval_ns: AtomicU64,
}

/// Plain copy of [`DisplayTimingModel`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingSnapshot {
    /// Total scanlines per refresh including blanking
    pub total_scanlines: u32,
    /// Visible scanlines
    pub active_scanlines: u32,
    /// Refresh period in nanoseconds
    pub refresh_interval_ns: u64,
}

impl TimingSnapshot {
    /// Whether every field is populated
    pub fn is_ready(&self) -> bool {
        self.total_scanlines > 0 && self.refresh_interval_ns > 0
    }

    /// Nanoseconds per scanline
    pub fn scanline_duration_ns(&self) -> f64 {
        if self.total_scanlines == 0 {
            return 0.0;
        }
        self.refresh_interval_ns as f64 / self.total_scanlines as f64
    }
}

impl From<&DisplayTiming> for TimingSnapshot {
    fn from(timing: &DisplayTiming) -> Self {
        Self {
            total_scanlines: timing.total_scanlines,
            active_scanlines: timing.active_scanlines,
            refresh_interval_ns: timing.refresh.interval_ns(),
        }
    }
}

impl DisplayTimingModel {
    /// Empty (not ready) model
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish new timing
    pub fn publish(&self, snapshot: TimingSnapshot) {
        self.total_scanlines
            .store(snapshot.total_scanlines, Ordering::Relaxed);
        self.active_scanlines
            .store(snapshot.active_scanlines, Ordering::Relaxed);
        self.refresh_interval_ns
            .store(snapshot.refresh_interval_ns, Ordering::Release);
    }

    /// Reset to "not ready"
    pub fn clear(&self) {
        self.publish(TimingSnapshot::default());
    }

    /// Read the current timing.
    ///
    /// Fields are loaded independently; a concurrent publish may produce a
    /// mixed snapshot for one cycle, which only degrades pacing precision.
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            refresh_interval_ns: self.refresh_interval_ns.load(Ordering::Acquire),
            total_scanlines: self.total_scanlines.load(Ordering::Relaxed),
            active_scanlines: self.active_scanlines.load(Ordering::Relaxed),
        }
    }

    /// Whether the model has been populated
    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ready()
    }
}

/// Shared state between the present thread, the sampler thread and the UI.
///
/// Owned through an `Arc` and handed to every pacing component at
/// construction.
#[derive(Debug)]
pub struct PacingContext {
    /// Window being paced (0 = none)
    window: AtomicUsize,
    /// Timing of the bound display
    pub model: DisplayTimingModel,
    /// Phase correction in scanlines, stored as `f64` bits
    phase_offset_bits: AtomicU64,
    /// Shortest scanline query seen on the bound output (0 = none yet)
    min_query_ns: AtomicU64,
    /// Incremented each time the scheduler rebinds to a different output
    binding_generation: AtomicU64,
    /// Diagnostics only: name of the output currently bound
    bound_display: RwLock<Option<String>>,
}

impl PacingContext {
    /// Create a context tracking no window
    pub fn new() -> Self {
        Self {
            window: AtomicUsize::new(0),
            model: DisplayTimingModel::new(),
            phase_offset_bits: AtomicU64::new(0f64.to_bits()),
            min_query_ns: AtomicU64::new(0),
            binding_generation: AtomicU64::new(0),
            bound_display: RwLock::new(None),
        }
    }

    /// Create a context already tracking `window`
    pub fn for_window(window: WindowHandle) -> Self {
        let ctx = Self::new();
        ctx.set_window(window);
        ctx
    }

    /// Tracked window, if any
    pub fn window(&self) -> Option<WindowHandle> {
        match self.window.load(Ordering::Acquire) {
            0 => None,
            raw => Some(WindowHandle(raw)),
        }
    }

    /// Change the tracked window
    pub fn set_window(&self, window: WindowHandle) {
        self.window.store(window.0, Ordering::Release);
    }

    /// Stop tracking any window
    pub fn clear_window(&self) {
        self.window.store(0, Ordering::Release);
    }

    /// Current phase correction in scanlines
    pub fn phase_offset(&self) -> f64 {
        f64::from_bits(self.phase_offset_bits.load(Ordering::Relaxed))
    }

    /// Publish a new phase correction
    pub fn set_phase_offset(&self, offset: f64) {
        self.phase_offset_bits
            .store(offset.to_bits(), Ordering::Relaxed);
    }

    /// Shortest trusted scanline query duration, if any sample was taken
    pub fn min_query_ns(&self) -> Option<u64> {
        match self.min_query_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => Some(ns),
        }
    }

    /// Publish the tracker's query-duration floor (0 clears it)
    pub fn set_min_query_ns(&self, ns: u64) {
        self.min_query_ns.store(ns, Ordering::Relaxed);
    }

    /// Current binding generation
    pub fn binding_generation(&self) -> u64 {
        self.binding_generation.load(Ordering::Acquire)
    }

    /// Record a rebind to `output_name` (or loss of binding with `None`)
    pub fn note_rebind(&self, output_name: Option<&str>) {
        *self.bound_display.write() = output_name.map(str::to_owned);
        self.binding_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Name of the currently bound output
    pub fn bound_display(&self) -> Option<String> {
        self.bound_display.read().clone()
    }
}

impl Default for PacingContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::RefreshRate;

    #[test]
    fn test_model_starts_unready() {
        let model = DisplayTimingModel::new();
        assert!(!model.is_ready());
        assert_eq!(model.snapshot(), TimingSnapshot::default());
    }

    #[test]
    fn test_publish_and_clear() {
        let model = DisplayTimingModel::new();
        let timing = DisplayTiming {
            total_scanlines: 1125,
            active_scanlines: 1080,
            refresh: RefreshRate::new(60, 1),
        };
        model.publish(TimingSnapshot::from(&timing));

        let snap = model.snapshot();
        assert!(snap.is_ready());
        assert_eq!(snap.total_scanlines, 1125);
        assert_eq!(snap.active_scanlines, 1080);
        assert_eq!(snap.refresh_interval_ns, 16_666_667);

        model.clear();
        assert!(!model.is_ready());
    }

    #[test]
    fn test_context_window_tracking() {
        let ctx = PacingContext::new();
        assert_eq!(ctx.window(), None);

        ctx.set_window(WindowHandle(0xBEEF));
        assert_eq!(ctx.window(), Some(WindowHandle(0xBEEF)));

        ctx.clear_window();
        assert_eq!(ctx.window(), None);
    }

    #[test]
    fn test_context_rebind_bumps_generation() {
        let ctx = PacingContext::new();
        let gen = ctx.binding_generation();

        ctx.note_rebind(Some("\\\\.\\DISPLAY1"));
        assert_eq!(ctx.binding_generation(), gen + 1);
        assert_eq!(ctx.bound_display().as_deref(), Some("\\\\.\\DISPLAY1"));

        ctx.note_rebind(None);
        assert_eq!(ctx.binding_generation(), gen + 2);
        assert_eq!(ctx.bound_display(), None);
    }

    #[test]
    fn test_phase_offset_round_trips_through_bits() {
        let ctx = PacingContext::new();
        ctx.set_phase_offset(412.75);
        assert_eq!(ctx.phase_offset(), 412.75);
    }
}
