//! Scanline sampler
//!
//! One bracketed scan-position query per call. Owned by the sampler thread.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::clock::{Clock, ClockSample, TickDuration};
use crate::display::{BindOutcome, DisplayBackend, DisplayBinder, WindowHandle};

/// One observation of the display controller's scan position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSample {
    /// Midpoint between the clock reads bracketing the query
    pub sample_mid_time: ClockSample,
    /// Reported scanline
    pub scanline: u32,
    /// Time spent inside the query
    pub query_duration: TickDuration,
}

/// Binds to the tracked window's display and queries its scan position
#[derive(Debug)]
pub struct ScanlineSampler {
    clock: &'static Clock,
    binder: DisplayBinder,
}

impl ScanlineSampler {
    /// Create an unbound sampler
    pub fn new(clock: &'static Clock, backend: Arc<dyn DisplayBackend>) -> Self {
        Self {
            clock,
            binder: DisplayBinder::new(backend),
        }
    }

    /// Bind to the display showing `window`. Returns `false` if none could
    /// be resolved; retry later.
    pub fn bind(&mut self, window: WindowHandle) -> bool {
        self.bind_checked(window).is_bound()
    }

    /// Like [`bind`](Self::bind) but reports whether the display changed
    pub fn bind_checked(&mut self, window: WindowHandle) -> BindOutcome {
        self.binder.bind_checked(window)
    }

    /// Drop the current binding
    pub fn unbind(&mut self) {
        self.binder.unbind();
    }

    /// Whether a display is bound
    pub fn is_bound(&self) -> bool {
        self.binder.is_bound()
    }

    /// Name of the bound display
    pub fn bound_name(&self) -> Option<&str> {
        self.binder.bound_name()
    }

    /// Take one sample. `None` if unbound or the query failed.
    pub fn sample(&mut self) -> Option<ScanSample> {
        if !self.binder.is_bound() {
            return None;
        }

        let before = self.clock.now();
        let result = self.binder.scan_position();
        let after = self.clock.now();

        match result {
            Ok(position) => {
                let query_duration = after - before;
                Some(ScanSample {
                    sample_mid_time: before + TickDuration(query_duration.ticks() / 2),
                    scanline: position.scanline,
                    query_duration,
                })
            }
            Err(e) if e.requires_rebind() => {
                debug!("Scan query lost its display: {}", e);
                self.binder.unbind();
                None
            }
            Err(e) => {
                trace!("Scan query failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SimulatedDisplay;
    use std::time::Duration;

    const WINDOW: WindowHandle = WindowHandle(0x77);

    #[test]
    fn test_unbound_sampler_returns_none() {
        let display = Arc::new(SimulatedDisplay::single_1080p60(Clock::global(), WINDOW));
        let mut sampler = ScanlineSampler::new(Clock::global(), display);
        assert!(sampler.sample().is_none());
    }

    #[test]
    fn test_sample_brackets_query() {
        let display = Arc::new(SimulatedDisplay::single_1080p60(Clock::global(), WINDOW));
        display.set_query_latency(Duration::from_micros(200));
        let mut sampler = ScanlineSampler::new(Clock::global(), display);
        assert!(sampler.bind(WINDOW));

        let sample = sampler.sample().expect("bound sampler should sample");
        let tps = Clock::global().ticks_per_second();
        assert!(sample.scanline < 1125);
        assert!(sample.query_duration.to_nanos(tps) >= 200_000);
    }

    #[test]
    fn test_transient_failure_keeps_binding() {
        let display = Arc::new(SimulatedDisplay::single_1080p60(Clock::global(), WINDOW));
        let mut sampler = ScanlineSampler::new(Clock::global(), display.clone());
        assert!(sampler.bind(WINDOW));

        display.fail_next_queries(1);
        assert!(sampler.sample().is_none());
        assert!(sampler.is_bound());
        assert!(sampler.sample().is_some());
    }

    #[test]
    fn test_disconnect_unbinds() {
        let display = Arc::new(SimulatedDisplay::single_1080p60(Clock::global(), WINDOW));
        let mut sampler = ScanlineSampler::new(Clock::global(), display.clone());
        assert!(sampler.bind(WINDOW));

        display.remove_output("SIM1");
        assert!(sampler.sample().is_none());
        assert!(!sampler.is_bound());
        assert!(!sampler.bind(WINDOW));
    }
}
