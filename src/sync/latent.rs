//! Latent Sync Limiter
//!
//! Scanline-targeted presentation scheduler. Before each present it
//! computes how long to wait so the present lands on a chosen scanline,
//! deep in vertical blank by default.
//!
//! # Cycle
//!
//! ```text
//!  Idle ─► ComputeTarget ─► Waiting ─► Presented ─► Idle
//!            │                              │
//!            └─ skip (unpaced) ◄── model     └─ on_present_end(): fold
//!               not ready / unbound /            present duration into
//!               implausible wait                 the overhead estimate
//! ```
//!
//! # Position Model
//!
//! Scan position is kept *unwrapped*: `refreshes_since_epoch * total +
//! line_within_refresh + phase_offset`. The target is circular, so each
//! cycle reconciles "one refresh after the last wake" against it with
//! [`reconcile`], which never skips or repeats a revolution when the target
//! drifts across line zero.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::{reconcile, wrap_scanline};
use crate::clock::{Clock, ClockSample, TickDuration, WaitTimer};
use crate::config::PacingConfig;
use crate::display::{BindOutcome, DisplayBackend, DisplayBinder, PacingContext, TimingSnapshot};

/// Log implausible waits on the first occurrence and then every Nth
pub(super) const IMPLAUSIBLE_WAIT_LOG_EVERY: u64 = 600;

/// Why a cycle went unpaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Divisor is zero
    #[error("pacing disabled")]
    Disabled,
    /// Host has not set a window
    #[error("no window tracked")]
    NoWindow,
    /// Window is not on any display that could be opened
    #[error("no display bound")]
    Unbound,
    /// Timing model still zeroed
    #[error("display timing model not ready")]
    ModelNotReady,
    /// Computed wait is longer than any sane frame
    #[error("computed wait of {wait_ns}ns exceeds limit of {max_wait_ns}ns")]
    ImplausibleWait {
        /// Computed wait
        wait_ns: u64,
        /// Configured ceiling
        max_wait_ns: u64,
    },
}

/// Wait computed for one present cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPlan {
    /// Target scanline in `[0, total)`
    pub target_scanline: f64,
    /// Unwrapped corrected position at plan time
    pub current_position: f64,
    /// Unwrapped position to wake at
    pub next_position: f64,
    /// Wait length
    pub wait_ns: u64,
    /// Absolute wake time
    pub deadline: ClockSample,
}

impl WaitPlan {
    /// Scanlines between now and the wake position
    pub fn delta_scanlines(&self) -> f64 {
        self.next_position - self.current_position
    }
}

/// Exponentially smoothed duration of this process's own present work
#[derive(Debug, Clone)]
pub struct OverheadEstimator {
    smoothing: f64,
    value_ns: f64,
    samples: u64,
}

impl OverheadEstimator {
    /// `smoothing` is the weight of each new sample, in `(0, 1]`
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(f64::EPSILON, 1.0),
            value_ns: 0.0,
            samples: 0,
        }
    }

    /// Fold one measurement in and return the new estimate
    pub fn record(&mut self, sample_ns: u64) -> f64 {
        self.value_ns = self.smoothing * sample_ns as f64 + (1.0 - self.smoothing) * self.value_ns;
        self.samples += 1;
        self.value_ns
    }

    /// Current estimate
    pub fn value_ns(&self) -> f64 {
        self.value_ns
    }

    /// Measurements folded in so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Back to zero
    pub fn reset(&mut self) {
        self.value_ns = 0.0;
        self.samples = 0;
    }
}

/// Limiter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Cycles that waited for a scanline
    pub paced_cycles: u64,
    /// Cycles passed through unpaced
    pub skipped_cycles: u64,
    /// Skips caused by an implausibly long wait
    pub implausible_waits: u64,
    /// Successful timing model refreshes
    pub model_refreshes: u64,
    /// Rebinds to a different display
    pub rebinds: u64,
    /// Length of the most recent wait
    pub last_wait_ns: u64,
}

/// Scanline-targeted presentation scheduler
pub struct LatentSyncLimiter {
    clock: &'static Clock,
    context: Arc<PacingContext>,
    binder: DisplayBinder,
    timer: WaitTimer,

    divisor: u32,
    scanline_bias: f64,
    max_wait_ns: u64,
    model_refresh_interval: TickDuration,

    overhead: OverheadEstimator,
    last_wake: Option<ClockSample>,
    last_model_refresh: Option<ClockSample>,
    present_start: Option<ClockSample>,
    binding_published: bool,

    stats: LimiterStats,
    last_skip: Option<SkipReason>,
}

impl LatentSyncLimiter {
    /// Create a limiter that publishes timing into `context`
    pub fn new(
        clock: &'static Clock,
        context: Arc<PacingContext>,
        backend: Arc<dyn DisplayBackend>,
        config: &PacingConfig,
    ) -> Self {
        Self {
            clock,
            context,
            binder: DisplayBinder::new(backend),
            timer: WaitTimer::new(),
            divisor: config.divisor,
            scanline_bias: config.scanline_bias,
            max_wait_ns: config.max_wait_ms.saturating_mul(1_000_000),
            model_refresh_interval: clock
                .duration_from_nanos(config.model_refresh_interval_ms.saturating_mul(1_000_000)),
            overhead: OverheadEstimator::new(config.overhead_smoothing),
            last_wake: None,
            last_model_refresh: None,
            present_start: None,
            binding_published: false,
            stats: LimiterStats::default(),
            last_skip: None,
        }
    }

    /// Pacing divisor (0 = disabled, 2 = half refresh rate)
    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Change the divisor; takes effect next cycle
    pub fn set_divisor(&mut self, divisor: u32) {
        if divisor != self.divisor {
            debug!("Latent sync divisor {} -> {}", self.divisor, divisor);
            self.divisor = divisor;
            self.last_wake = None;
        }
    }

    /// Scanline bias added to the vblank midpoint
    pub fn scanline_bias(&self) -> f64 {
        self.scanline_bias
    }

    /// Change the scanline bias
    pub fn set_scanline_bias(&mut self, bias: f64) {
        self.scanline_bias = bias;
    }

    /// Smoothed present overhead
    pub fn self_overhead_ns(&self) -> f64 {
        self.overhead.value_ns()
    }

    /// Counters
    pub fn stats(&self) -> LimiterStats {
        self.stats
    }

    /// Reason the most recent cycle was skipped, cleared by a paced cycle
    pub fn last_skip(&self) -> Option<SkipReason> {
        self.last_skip
    }

    /// Whether the limiter holds a display binding
    pub fn is_bound(&self) -> bool {
        self.binder.is_bound()
    }

    /// Target scanline for the current model, if it is ready
    pub fn target_scanline(&self) -> Option<f64> {
        let snapshot = self.context.model.snapshot();
        snapshot.is_ready().then(|| self.target_for(&snapshot))
    }

    fn target_for(&self, snapshot: &TimingSnapshot) -> f64 {
        let total = snapshot.total_scanlines as f64;
        let active = snapshot.active_scanlines as f64;
        let overhead_lines =
            self.overhead.value_ns() * total / snapshot.refresh_interval_ns as f64;
        wrap_scanline((active + total) / 2.0 + self.scanline_bias - overhead_lines, total)
    }

    /// Unwrapped corrected scan position at `at`
    fn position_at(&self, at: ClockSample, snapshot: &TimingSnapshot, offset: f64) -> f64 {
        let total = snapshot.total_scanlines as f64;
        let refresh_ns = snapshot.refresh_interval_ns;
        let t_ns = self.clock.to_nanos(at);
        let whole = (t_ns / refresh_ns) as f64;
        let within = (t_ns % refresh_ns) as f64 / refresh_ns as f64;
        whole * total + within * total + offset
    }

    /// Compute the wait for a present at `now` without side effects.
    pub fn compute_plan(&self, now: ClockSample) -> Result<WaitPlan, SkipReason> {
        if self.divisor == 0 {
            return Err(SkipReason::Disabled);
        }
        let snapshot = self.context.model.snapshot();
        if !snapshot.is_ready() {
            return Err(SkipReason::ModelNotReady);
        }

        let total = snapshot.total_scanlines as f64;
        let offset = self.context.phase_offset();
        let target = self.target_for(&snapshot);
        let current = self.position_at(now, &snapshot, offset);

        let extra = (self.divisor - 1) as f64 * total;
        let span = self.divisor as f64 * total;
        let fresh = current + wrap_scanline(target - current, total) + extra;

        let next = match self.last_wake {
            None => fresh,
            Some(wake) => {
                let predicted = self.position_at(wake, &snapshot, offset) + span;
                let mut next = reconcile(predicted, target, total);
                if next < current {
                    next += ((current - next) / total).ceil() * total;
                }
                if next - current > span {
                    fresh
                } else {
                    next
                }
            }
        };

        let wait_ns = ((next - current) * snapshot.refresh_interval_ns as f64 / total).round() as u64;
        if wait_ns > self.max_wait_ns {
            return Err(SkipReason::ImplausibleWait {
                wait_ns,
                max_wait_ns: self.max_wait_ns,
            });
        }

        Ok(WaitPlan {
            target_scanline: target,
            current_position: current,
            next_position: next,
            wait_ns,
            deadline: now + self.clock.duration_from_nanos(wait_ns),
        })
    }

    /// Block until the next target scanline, or return at once with the
    /// reason the cycle was left unpaced.
    pub fn limit(&mut self) -> Result<WaitPlan, SkipReason> {
        let now = self.clock.now();
        if self.divisor == 0 {
            return self.skip(SkipReason::Disabled);
        }

        self.maintain_binding(now);
        if self.context.window().is_none() {
            return self.skip(SkipReason::NoWindow);
        }
        if !self.binder.is_bound() {
            return self.skip(SkipReason::Unbound);
        }

        // Binding upkeep may have blocked on a timing query
        let now = self.clock.now();
        match self.compute_plan(now) {
            Ok(plan) => {
                trace!(
                    "Waiting {}ns for scanline {:.1} ({:.1} lines)",
                    plan.wait_ns,
                    plan.target_scanline,
                    plan.delta_scanlines()
                );
                self.clock.wait_until(plan.deadline, &mut self.timer);
                self.last_wake = Some(self.clock.now());
                self.stats.paced_cycles += 1;
                self.stats.last_wait_ns = plan.wait_ns;
                self.last_skip = None;
                Ok(plan)
            }
            Err(reason) => self.skip(reason),
        }
    }

    fn skip(&mut self, reason: SkipReason) -> Result<WaitPlan, SkipReason> {
        self.last_wake = None;
        self.stats.skipped_cycles += 1;
        if let SkipReason::ImplausibleWait { .. } = reason {
            self.stats.implausible_waits += 1;
            let n = self.stats.implausible_waits;
            if n == 1 || n % IMPLAUSIBLE_WAIT_LOG_EVERY == 0 {
                warn!("Skipping pacing: {} (occurrence {})", reason, n);
            }
        } else if self.last_skip != Some(reason) {
            debug!("Pacing unavailable: {}", reason);
        }
        self.last_skip = Some(reason);
        Err(reason)
    }

    /// Stamp the start of the host's present call
    pub fn on_present_start(&mut self) {
        self.present_start = Some(self.clock.now());
    }

    /// Fold the time since [`on_present_start`](Self::on_present_start)
    /// into the overhead estimate.
    pub fn on_present_end(&mut self) {
        if let Some(start) = self.present_start.take() {
            self.record_present(start, self.clock.now());
        }
    }

    /// Fold an externally measured present call into the overhead estimate
    pub fn record_present(&mut self, start: ClockSample, end: ClockSample) {
        let sample_ns = (end - start).to_nanos(self.clock.ticks_per_second());
        self.overhead.record(sample_ns);
    }

    /// Resolve the window's display and refresh the timing model when due
    fn maintain_binding(&mut self, now: ClockSample) {
        let Some(window) = self.context.window() else {
            self.drop_binding();
            return;
        };

        match self.binder.bind_checked(window) {
            BindOutcome::Rebound => {
                info!(
                    "Latent sync bound to {}",
                    self.binder.bound_name().unwrap_or("<unknown>")
                );
                self.context.note_rebind(self.binder.bound_name());
                self.binding_published = true;
                self.stats.rebinds += 1;
                self.last_wake = None;
                self.refresh_model(now);
            }
            BindOutcome::Unchanged => {
                let due = self
                    .last_model_refresh
                    .map_or(true, |last| now - last >= self.model_refresh_interval);
                if due {
                    self.refresh_model(now);
                }
            }
            BindOutcome::Failed => self.drop_binding(),
        }
    }

    fn drop_binding(&mut self) {
        self.binder.unbind();
        if self.binding_published {
            info!("Latent sync lost its display, presenting unpaced");
            self.context.note_rebind(None);
            self.context.model.clear();
            self.binding_published = false;
            self.last_model_refresh = None;
        }
    }

    fn refresh_model(&mut self, now: ClockSample) {
        self.last_model_refresh = Some(now);
        match self.binder.query_timing() {
            Ok(timing) => {
                let snapshot = TimingSnapshot::from(&timing);
                if snapshot != self.context.model.snapshot() {
                    debug!(
                        "Display timing: {} total / {} active lines, {}ns refresh",
                        snapshot.total_scanlines,
                        snapshot.active_scanlines,
                        snapshot.refresh_interval_ns
                    );
                }
                self.context.model.publish(snapshot);
                self.stats.model_refreshes += 1;
            }
            Err(e) => {
                debug!("Display timing refresh failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for LatentSyncLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatentSyncLimiter")
            .field("binder", &self.binder)
            .field("divisor", &self.divisor)
            .field("scanline_bias", &self.scanline_bias)
            .field("self_overhead_ns", &self.overhead.value_ns())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{SimulatedDisplay, WindowHandle};

    const WINDOW: WindowHandle = WindowHandle(0x5);
    const REFRESH_NS: u64 = 16_666_667;

    fn setup(config: PacingConfig) -> (LatentSyncLimiter, Arc<PacingContext>, Arc<SimulatedDisplay>) {
        let clock = Clock::global();
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));
        let limiter = LatentSyncLimiter::new(clock, context.clone(), display.clone(), &config);
        (limiter, context, display)
    }

    fn publish_1080p60(context: &PacingContext) {
        context.model.publish(TimingSnapshot {
            total_scanlines: 1125,
            active_scanlines: 1080,
            refresh_interval_ns: REFRESH_NS,
        });
    }

    /// A clock sample on an exact refresh boundary
    fn frame_boundary(frames: u64) -> ClockSample {
        ClockSample::from_nanos(REFRESH_NS * frames, Clock::global().ticks_per_second())
    }

    #[test]
    fn test_target_is_vblank_midpoint() {
        let (limiter, context, _) = setup(PacingConfig::default());
        assert_eq!(limiter.target_scanline(), None);
        publish_1080p60(&context);
        assert_eq!(limiter.target_scanline(), Some(1102.5));
    }

    #[test]
    fn test_end_to_end_wait() {
        let (limiter, context, _) = setup(PacingConfig::default());
        publish_1080p60(&context);
        context.set_phase_offset(1000.0);

        let plan = limiter.compute_plan(frame_boundary(600)).unwrap();
        assert_eq!(plan.target_scanline, 1102.5);
        assert!((plan.delta_scanlines() - 102.5).abs() < 1e-6);

        let expected = 102.5 * REFRESH_NS as f64 / 1125.0;
        assert!((plan.wait_ns as f64 - expected).abs() < 1_000.0);
        assert!((plan.wait_ns as f64 - 1_517_695.0).abs() / 1_517_695.0 < 1e-3);
    }

    #[test]
    fn test_overhead_moves_target_earlier() {
        let (mut limiter, context, _) = setup(PacingConfig {
            overhead_smoothing: 1.0,
            ..PacingConfig::default()
        });
        publish_1080p60(&context);

        // One full scanline worth of overhead
        let start = ClockSample(0);
        let end = start + Clock::global().duration_from_nanos(REFRESH_NS / 1125);
        limiter.record_present(start, end);

        let target = limiter.target_scanline().unwrap();
        assert!((target - 1101.5).abs() < 0.01, "target {}", target);
    }

    #[test]
    fn test_prediction_across_wrap() {
        let (mut limiter, context, _) = setup(PacingConfig {
            // Target lands on line 5 after wrapping
            scanline_bias: 27.5,
            ..PacingConfig::default()
        });
        publish_1080p60(&context);
        let tps = Clock::global().ticks_per_second();

        // Woke on line 1100, presented, 200 lines of work later we plan again
        let line_ns = |lines: f64| (lines * REFRESH_NS as f64 / 1125.0) as u64;
        let wake = ClockSample::from_nanos(REFRESH_NS * 600 + line_ns(1100.0), tps);
        let now = ClockSample::from_nanos(REFRESH_NS * 600 + line_ns(1300.0), tps);
        limiter.last_wake = Some(wake);

        let plan = limiter.compute_plan(now).unwrap();
        assert_eq!(plan.target_scanline, 5.0);
        // One revolution after line 1100 is 601*1125 + 1100, which
        // reconciles forward 30 lines to line 5 of the next refresh
        let expected = 602.0 * 1125.0 + 5.0;
        assert!(
            (plan.next_position - expected).abs() < 0.01,
            "next {}",
            plan.next_position
        );
        assert!((plan.delta_scanlines() - 955.0).abs() < 0.01);
    }

    #[test]
    fn test_late_frame_advances_whole_refreshes() {
        let (mut limiter, context, _) = setup(PacingConfig::default());
        publish_1080p60(&context);
        let tps = Clock::global().ticks_per_second();

        limiter.last_wake = Some(frame_boundary(600));
        // Two and a half refreshes of work
        let now = ClockSample::from_nanos(REFRESH_NS * 602 + REFRESH_NS / 2, tps);
        let plan = limiter.compute_plan(now).unwrap();

        assert!(plan.next_position >= plan.current_position);
        assert!(plan.delta_scanlines() < 1125.0);
        assert!((wrap_scanline(plan.next_position, 1125.0) - 1102.5).abs() < 0.01);
    }

    #[test]
    fn test_divisor_adds_refreshes() {
        let (limiter, context, _) = setup(PacingConfig {
            divisor: 2,
            ..PacingConfig::default()
        });
        publish_1080p60(&context);

        let plan = limiter.compute_plan(frame_boundary(600)).unwrap();
        assert!((plan.delta_scanlines() - (1102.5 + 1125.0)).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_and_unready() {
        let (limiter, context, _) = setup(PacingConfig {
            divisor: 0,
            ..PacingConfig::default()
        });
        publish_1080p60(&context);
        assert_eq!(limiter.compute_plan(frame_boundary(1)), Err(SkipReason::Disabled));

        let (limiter, _, _) = setup(PacingConfig::default());
        assert_eq!(limiter.compute_plan(frame_boundary(1)), Err(SkipReason::ModelNotReady));
    }

    #[test]
    fn test_implausible_wait_is_skipped() {
        let (limiter, context, _) = setup(PacingConfig {
            divisor: 90,
            ..PacingConfig::default()
        });
        publish_1080p60(&context);
        assert!(matches!(
            limiter.compute_plan(frame_boundary(600)),
            Err(SkipReason::ImplausibleWait { max_wait_ns: 1_000_000_000, .. })
        ));
    }

    #[test]
    fn test_overhead_estimator_convergence() {
        let mut estimator = OverheadEstimator::new(0.01);
        let x = 750_000.0;
        for _ in 0..400 {
            estimator.record(750_000);
        }
        assert!((x - estimator.value_ns()) / x > 0.01);
        for _ in 400..459 {
            estimator.record(750_000);
        }
        assert!((x - estimator.value_ns()) / x <= 0.01);
        assert_eq!(estimator.samples(), 459);
    }

    #[test]
    fn test_limit_binds_and_paces() {
        let (mut limiter, context, display) = setup(PacingConfig::default());
        let plan = limiter.limit().expect("simulated display should pace");
        assert!(plan.wait_ns <= REFRESH_NS);
        assert!(context.model.is_ready());
        assert_eq!(context.bound_display().as_deref(), Some("SIM1"));
        assert_eq!(display.open_adapter_count(), 1);

        // Second cycle lands one refresh after the first wake
        let plan = limiter.limit().unwrap();
        assert!(plan.wait_ns <= REFRESH_NS);
        assert_eq!(limiter.stats().paced_cycles, 2);
    }

    #[test]
    fn test_limit_without_display_passes_through() {
        let (mut limiter, context, display) = setup(PacingConfig::default());
        assert!(limiter.limit().is_ok());
        let generation = context.binding_generation();

        display.detach_window(WINDOW);
        assert_eq!(limiter.limit(), Err(SkipReason::Unbound));
        assert!(!context.model.is_ready());
        assert_eq!(context.bound_display(), None);
        assert_eq!(context.binding_generation(), generation + 1);

        // Repeated failures do not keep bumping the generation
        assert_eq!(limiter.limit(), Err(SkipReason::Unbound));
        assert_eq!(context.binding_generation(), generation + 1);

        context.clear_window();
        assert_eq!(limiter.limit(), Err(SkipReason::NoWindow));
    }

    #[test]
    fn test_slow_timing_query_does_not_shift_wake() {
        let clock = Clock::global();
        clock.setup_high_resolution_mode();
        let (mut limiter, _context, display) = setup(PacingConfig {
            model_refresh_interval_ms: 0,
            ..PacingConfig::default()
        });
        display.set_timing_query_latency(std::time::Duration::from_millis(4));

        let mut misses = 0;
        for _ in 0..30 {
            // Frame work leaves less time than the timing query takes
            std::thread::sleep(std::time::Duration::from_millis(13));
            let plan = limiter.limit().unwrap();
            let line = display.scanline_at("SIM1", clock.now()).unwrap() as f64;
            let off = wrap_scanline(line - plan.target_scanline, 1125.0);
            if off.min(1125.0 - off) > 20.0 {
                misses += 1;
            }
        }
        assert!(misses <= 3, "{} of 30 wakes missed the target", misses);
    }
}
