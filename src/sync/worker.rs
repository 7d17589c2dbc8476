//! Sampler thread
//!
//! Owns a [`ScanlineSampler`] and a [`PhaseTracker`] on a dedicated thread
//! and publishes the phase offset into the shared [`PacingContext`].
//! Display hiccups only ever stall this thread, never the present thread.
//!
//! Shutdown is cooperative: [`SamplerWorker::stop`] raises a flag checked
//! once per poll, so stopping takes up to one poll interval.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use super::{PhaseTracker, PhaseUpdate, ScanlineSampler};
use crate::clock::Clock;
use crate::config::SamplerConfig;
use crate::display::{BindOutcome, DisplayBackend, PacingContext};

/// How many poll intervals to back off after a failed bind
const BIND_RETRY_POLLS: u32 = 20;

#[derive(Debug, Default)]
struct SamplerCounters {
    samples: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    rebinds: AtomicU64,
}

/// Sampler thread counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    /// Successful scan queries
    pub samples: u64,
    /// Failed or unbound queries
    pub failures: u64,
    /// Samples discarded as untrusted
    pub rejected: u64,
    /// Display (re)bindings performed
    pub rebinds: u64,
}

/// Handle to the running sampler thread
#[derive(Debug)]
pub struct SamplerWorker {
    stop: Arc<AtomicBool>,
    counters: Arc<SamplerCounters>,
    handle: Option<JoinHandle<()>>,
}

impl SamplerWorker {
    /// Spawn the sampler thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn start(
        clock: &'static Clock,
        context: Arc<PacingContext>,
        backend: Arc<dyn DisplayBackend>,
        config: SamplerConfig,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(SamplerCounters::default());

        let handle = {
            let stop = stop.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("scanline-sampler".to_string())
                .spawn(move || run_sampler_loop(clock, &context, backend, &config, &stop, &counters))?
        };

        info!("Scanline sampler thread started");
        Ok(Self {
            stop,
            counters,
            handle: Some(handle),
        })
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Counter snapshot
    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            samples: self.counters.samples.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            rebinds: self.counters.rebinds.load(Ordering::Relaxed),
        }
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Scanline sampler thread panicked");
            } else {
                info!("Scanline sampler thread stopped");
            }
        }
    }
}

impl Drop for SamplerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sampler_loop(
    clock: &'static Clock,
    context: &PacingContext,
    backend: Arc<dyn DisplayBackend>,
    config: &SamplerConfig,
    stop: &AtomicBool,
    counters: &SamplerCounters,
) {
    let poll = Duration::from_micros(config.poll_interval_us.max(1));
    let tps = clock.ticks_per_second();

    let mut sampler = ScanlineSampler::new(clock, backend);
    let mut tracker = PhaseTracker::new(config.trusted_query_factor, config.correction_gain);
    let mut seen_generation = context.binding_generation();
    let mut retry_in = 0u32;

    while !stop.load(Ordering::Acquire) {
        let Some(window) = context.window() else {
            if sampler.is_bound() {
                sampler.unbind();
                tracker.reset();
                context.set_phase_offset(0.0);
                context.set_min_query_ns(0);
            }
            thread::sleep(poll);
            continue;
        };

        let generation = context.binding_generation();
        if generation != seen_generation || (!sampler.is_bound() && retry_in == 0) {
            seen_generation = generation;
            match sampler.bind_checked(window) {
                BindOutcome::Rebound => {
                    debug!("Sampler bound to {:?}", sampler.bound_name());
                    counters.rebinds.fetch_add(1, Ordering::Relaxed);
                    tracker.reset();
                    // Offset belonged to the previous output
                    context.set_phase_offset(0.0);
                    context.set_min_query_ns(0);
                }
                BindOutcome::Unchanged => {}
                BindOutcome::Failed => retry_in = BIND_RETRY_POLLS,
            }
        }

        match sampler.sample() {
            Some(sample) => {
                counters.samples.fetch_add(1, Ordering::Relaxed);
                match tracker.update(&sample, context.model.snapshot(), tps) {
                    PhaseUpdate::Applied { .. } => {
                        context.set_phase_offset(tracker.offset());
                    }
                    PhaseUpdate::Untrusted => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    PhaseUpdate::ModelNotReady => {}
                }
                context.set_min_query_ns(tracker.min_query_ns().unwrap_or(0));
            }
            None => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                retry_in = retry_in.saturating_sub(1);
            }
        }

        thread::sleep(poll);
    }

    sampler.unbind();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{SimulatedDisplay, TimingSnapshot, WindowHandle};
    use std::time::Instant;

    const WINDOW: WindowHandle = WindowHandle(0x99);

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_worker_samples_and_stops() {
        let clock = Clock::global();
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));
        context.model.publish(TimingSnapshot {
            total_scanlines: 1125,
            active_scanlines: 1080,
            refresh_interval_ns: 16_666_667,
        });

        let mut worker =
            SamplerWorker::start(clock, context.clone(), display.clone(), SamplerConfig::default())
                .unwrap();
        assert!(wait_for(|| worker.stats().samples >= 20));
        assert_eq!(display.open_adapter_count(), 1);
        assert!(context.min_query_ns().is_some());

        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(display.open_adapter_count(), 0);
    }

    #[test]
    fn test_worker_survives_window_loss() {
        let clock = Clock::global();
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));

        let worker =
            SamplerWorker::start(clock, context.clone(), display.clone(), SamplerConfig::default())
                .unwrap();
        assert!(wait_for(|| worker.stats().samples > 0));

        display.remove_output("SIM1");
        assert!(wait_for(|| worker.stats().failures > 10));
        assert!(worker.is_running());

        // Window comes back on a new output
        display.add_output(
            "SIM2",
            crate::display::DisplayTiming {
                total_scanlines: 1125,
                active_scanlines: 1080,
                refresh: crate::display::RefreshRate::new(60, 1),
            },
        );
        display.attach_window(WINDOW, "SIM2");
        let samples = worker.stats().samples;
        assert!(wait_for(|| worker.stats().samples > samples));
        assert!(worker.stats().rebinds >= 2);
    }

    #[test]
    fn test_drop_joins_thread() {
        let clock = Clock::global();
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));
        {
            let _worker =
                SamplerWorker::start(clock, context, display.clone(), SamplerConfig::default())
                    .unwrap();
            assert!(wait_for(|| display.open_adapter_count() == 1));
        }
        assert_eq!(display.open_adapter_count(), 0);
    }

    #[test]
    fn test_rebind_clears_previous_offset() {
        let clock = Clock::global();
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));
        // Left over from another output; no model yet, so no sample can replace it
        context.set_phase_offset(500.0);

        let worker =
            SamplerWorker::start(clock, context.clone(), display, SamplerConfig::default()).unwrap();
        assert!(wait_for(|| worker.stats().rebinds >= 1 && worker.stats().samples > 0));
        assert_eq!(context.phase_offset(), 0.0);
    }
}
