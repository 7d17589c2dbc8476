//! Frame pacer
//!
//! Host-facing entry point. Picks between scanline pacing, a plain fps cap
//! and pass-through, and falls back to the fps cap whenever scanline pacing
//! cannot lock onto a display.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LatentSyncLimiter, LimiterStats, SamplerStats, SamplerWorker, SimpleFrameLimiter, SkipReason};
use crate::clock::Clock;
use crate::config::{PacingConfig, SamplerConfig};
use crate::display::{DisplayBackend, PacingContext, TimingSnapshot, WindowHandle};

/// How presents are paced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// No waiting
    Disabled,
    /// Fixed frame rate via [`SimpleFrameLimiter`]
    #[serde(alias = "simple")]
    SimpleFps,
    /// Scanline-targeted pacing via [`LatentSyncLimiter`]
    #[default]
    #[serde(alias = "scanline")]
    ScanlineSync,
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::SimpleFps => write!(f, "simple"),
            Self::ScanlineSync => write!(f, "scanline"),
        }
    }
}

impl FromStr for PacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            "simple" | "simple_fps" | "fps" => Ok(Self::SimpleFps),
            "scanline" | "scanline_sync" | "latent" | "vblank" => Ok(Self::ScanlineSync),
            _ => Err(format!("Unknown pacing mode: {}", s)),
        }
    }
}

/// Read-only pacing state for overlays and logs
#[derive(Debug, Clone, Serialize)]
pub struct PacingDiagnostics {
    /// Active mode
    pub mode: PacingMode,
    /// Frame rate used by the fps cap and fallback
    pub target_fps: f64,
    /// Scanline pacing divisor
    pub divisor: u32,
    /// Scanline bias
    pub scanline_bias: f64,
    /// Smoothed present overhead
    pub self_overhead_ns: f64,
    /// Current phase correction in scanlines
    pub phase_offset: f64,
    /// Shortest trusted scan query
    pub min_query_ns: Option<u64>,
    /// Output the window is on
    pub bound_display: Option<String>,
    /// Timing model in use
    pub total_scanlines: u32,
    /// Visible lines of the timing model
    pub active_scanlines: u32,
    /// Refresh period of the timing model
    pub refresh_interval_ns: u64,
    /// Scanline limiter counters
    pub limiter: LimiterStats,
    /// Reason the last scanline cycle went unpaced
    pub last_skip: Option<SkipReason>,
    /// Frames paced by the fps cap because scanline pacing was unavailable
    pub fallback_frames: u64,
    /// Sampler thread counters, if it is running
    pub sampler: Option<SamplerStats>,
}

/// Pacing front end owned by the present thread
pub struct FramePacer {
    clock: &'static Clock,
    context: Arc<PacingContext>,
    backend: Arc<dyn DisplayBackend>,
    mode: PacingMode,
    target_fps: f64,
    latent: LatentSyncLimiter,
    simple: SimpleFrameLimiter,
    sampler_config: SamplerConfig,
    sampler: Option<SamplerWorker>,
    fallback_frames: u64,
}

impl FramePacer {
    /// Build a pacer. The sampler thread is not started until
    /// [`start_sampler`](Self::start_sampler) or the first scanline cycle.
    pub fn new(
        clock: &'static Clock,
        context: Arc<PacingContext>,
        backend: Arc<dyn DisplayBackend>,
        pacing: &PacingConfig,
        sampler: &SamplerConfig,
    ) -> Self {
        clock.setup_high_resolution_mode();
        Self {
            clock,
            latent: LatentSyncLimiter::new(clock, context.clone(), backend.clone(), pacing),
            simple: SimpleFrameLimiter::new(clock).with_max_wait_ms(pacing.max_wait_ms),
            context,
            backend,
            mode: pacing.mode,
            target_fps: pacing.target_fps,
            sampler_config: sampler.clone(),
            sampler: None,
            fallback_frames: 0,
        }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<PacingContext> {
        &self.context
    }

    /// Start the sampler thread if it is not running.
    ///
    /// Returns `false` if the thread could not be spawned; scanline pacing
    /// then runs without phase correction.
    pub fn start_sampler(&mut self) -> bool {
        if self.sampler.as_ref().is_some_and(SamplerWorker::is_running) {
            return true;
        }
        match SamplerWorker::start(
            self.clock,
            self.context.clone(),
            self.backend.clone(),
            self.sampler_config.clone(),
        ) {
            Ok(worker) => {
                self.sampler = Some(worker);
                true
            }
            Err(e) => {
                warn!("Failed to start scanline sampler: {}", e);
                false
            }
        }
    }

    /// Stop the sampler thread
    pub fn stop_sampler(&mut self) {
        if let Some(mut worker) = self.sampler.take() {
            worker.stop();
        }
    }

    /// Active mode
    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    /// Switch pacing mode
    pub fn set_mode(&mut self, mode: PacingMode) {
        if mode == self.mode {
            return;
        }
        info!("Pacing mode {} -> {}", self.mode, mode);
        self.mode = mode;
        self.simple.reset();
        if mode != PacingMode::ScanlineSync {
            self.stop_sampler();
        }
    }

    /// Frame rate for the fps cap (0 = uncapped)
    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Change the fps cap
    pub fn set_target_fps(&mut self, fps: f64) {
        self.target_fps = if fps.is_finite() { fps.max(0.0) } else { 0.0 };
    }

    /// Change the scanline divisor (0 disables scanline pacing)
    pub fn set_divisor(&mut self, divisor: u32) {
        self.latent.set_divisor(divisor);
    }

    /// Change the scanline bias
    pub fn set_scanline_bias(&mut self, bias: f64) {
        self.latent.set_scanline_bias(bias);
    }

    /// Track a different window
    pub fn set_window(&mut self, window: WindowHandle) {
        self.context.set_window(window);
    }

    /// Call before the host's present.
    pub fn limit(&mut self) {
        match self.mode {
            PacingMode::Disabled => {}
            PacingMode::SimpleFps => {
                self.simple.limit(self.target_fps);
            }
            PacingMode::ScanlineSync => {
                if self.sampler.is_none() {
                    self.start_sampler();
                }
                match self.latent.limit() {
                    Ok(_) => self.simple.reset(),
                    Err(SkipReason::Disabled) => {}
                    Err(reason) => {
                        if self.target_fps > 0.0 {
                            if self.fallback_frames == 0 {
                                debug!("Falling back to fps cap: {}", reason);
                            }
                            self.fallback_frames += 1;
                            self.simple.limit(self.target_fps);
                        }
                    }
                }
            }
        }
    }

    /// Call right before the host's present call
    pub fn on_present_start(&mut self) {
        self.latent.on_present_start();
    }

    /// Call right after the host's present call returns
    pub fn on_present_end(&mut self) {
        self.latent.on_present_end();
    }

    /// Snapshot of the pacing state
    pub fn diagnostics(&self) -> PacingDiagnostics {
        let model: TimingSnapshot = self.context.model.snapshot();
        PacingDiagnostics {
            mode: self.mode,
            target_fps: self.target_fps,
            divisor: self.latent.divisor(),
            scanline_bias: self.latent.scanline_bias(),
            self_overhead_ns: self.latent.self_overhead_ns(),
            phase_offset: self.context.phase_offset(),
            min_query_ns: self.context.min_query_ns(),
            bound_display: self.context.bound_display(),
            total_scanlines: model.total_scanlines,
            active_scanlines: model.active_scanlines,
            refresh_interval_ns: model.refresh_interval_ns,
            limiter: self.latent.stats(),
            last_skip: self.latent.last_skip(),
            fallback_frames: self.fallback_frames,
            sampler: self.sampler.as_ref().map(SamplerWorker::stats),
        }
    }
}

impl Drop for FramePacer {
    fn drop(&mut self) {
        self.stop_sampler();
    }
}

impl fmt::Debug for FramePacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePacer")
            .field("mode", &self.mode)
            .field("target_fps", &self.target_fps)
            .field("latent", &self.latent)
            .field("sampler_running", &self.sampler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SimulatedDisplay;

    const WINDOW: WindowHandle = WindowHandle(0xA1);

    fn pacer(mode: PacingMode) -> (FramePacer, Arc<SimulatedDisplay>) {
        let clock = Clock::global();
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));
        let pacing = PacingConfig {
            mode,
            target_fps: 240.0,
            ..PacingConfig::default()
        };
        let pacer = FramePacer::new(clock, context, display.clone(), &pacing, &SamplerConfig::default());
        (pacer, display)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("scanline".parse::<PacingMode>(), Ok(PacingMode::ScanlineSync));
        assert_eq!("FPS".parse::<PacingMode>(), Ok(PacingMode::SimpleFps));
        assert_eq!("off".parse::<PacingMode>(), Ok(PacingMode::Disabled));
        assert!("sometimes".parse::<PacingMode>().is_err());
        assert_eq!(PacingMode::SimpleFps.to_string(), "simple");
    }

    #[test]
    fn test_scanline_mode_paces_and_reports() {
        let (mut pacer, _display) = pacer(PacingMode::ScanlineSync);
        for _ in 0..3 {
            pacer.limit();
            pacer.on_present_start();
            pacer.on_present_end();
        }
        let diag = pacer.diagnostics();
        assert_eq!(diag.limiter.paced_cycles, 3);
        assert_eq!(diag.bound_display.as_deref(), Some("SIM1"));
        assert_eq!(diag.total_scanlines, 1125);
        assert!(diag.sampler.is_some());
        assert_eq!(diag.fallback_frames, 0);
    }

    #[test]
    fn test_falls_back_to_fps_cap_without_display() {
        let (mut pacer, display) = pacer(PacingMode::ScanlineSync);
        display.detach_window(WINDOW);

        let clock = Clock::global();
        pacer.limit();
        let start = clock.now();
        for _ in 0..4 {
            pacer.limit();
        }
        let elapsed_ns = (clock.now() - start).to_nanos(clock.ticks_per_second());

        let diag = pacer.diagnostics();
        assert_eq!(diag.fallback_frames, 5);
        assert_eq!(diag.last_skip, Some(SkipReason::Unbound));
        // 240 fps cap still applied: four intervals of ~4.17ms
        assert!(elapsed_ns >= 12_000_000, "elapsed {}ns", elapsed_ns);
    }

    #[test]
    fn test_disabled_mode_never_waits() {
        let (mut pacer, display) = pacer(PacingMode::Disabled);
        for _ in 0..100 {
            pacer.limit();
        }
        assert_eq!(pacer.diagnostics().limiter.paced_cycles, 0);
        assert!(pacer.diagnostics().sampler.is_none());
        assert_eq!(display.open_adapter_count(), 0);
    }

    #[test]
    fn test_switching_mode_stops_sampler() {
        let (mut pacer, _display) = pacer(PacingMode::ScanlineSync);
        pacer.limit();
        assert!(pacer.diagnostics().sampler.is_some());
        pacer.set_mode(PacingMode::SimpleFps);
        assert!(pacer.diagnostics().sampler.is_none());
        assert_eq!(pacer.mode(), PacingMode::SimpleFps);
    }

    #[test]
    fn test_tiny_fps_cap_does_not_stall() {
        let (mut pacer, _display) = pacer(PacingMode::SimpleFps);
        pacer.limit();
        pacer.set_target_fps(1e-6);

        let start = std::time::Instant::now();
        pacer.limit();
        pacer.limit();
        assert!(start.elapsed().as_millis() < 500);
        assert_eq!(pacer.target_fps(), 1e-6);
    }
}
