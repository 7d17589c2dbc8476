//! Clock-driven virtual display
//!
//! Reports a scan position computed from the monotonic clock, so the whole
//! pacing pipeline can run on machines without a kernel-mode scanline
//! query. Tests use the fault-injection knobs to exercise rebinding and
//! degraded paths.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    AdapterBinding, AdapterHandle, DisplayBackend, DisplayError, DisplayTiming, OutputDescriptor,
    Result, ScanPosition, WindowHandle,
};
use crate::clock::{Clock, ClockSample};

#[derive(Debug, Clone)]
struct SimOutput {
    timing: DisplayTiming,
    /// Scan position lead over `clock mod refresh`, in nanoseconds
    phase_ns: u64,
    native_handle: usize,
}

#[derive(Debug, Default)]
struct SimState {
    outputs: HashMap<String, SimOutput>,
    windows: HashMap<WindowHandle, String>,
    open_adapters: HashMap<u32, String>,
    next_adapter: u32,
    next_native_handle: usize,
    failing_queries: u32,
    query_latency: Duration,
    timing_latency: Duration,
}

/// Virtual display backend
#[derive(Debug)]
pub struct SimulatedDisplay {
    clock: &'static Clock,
    state: Mutex<SimState>,
}

impl SimulatedDisplay {
    /// Create a backend with no outputs
    pub fn new(clock: &'static Clock) -> Self {
        Self {
            clock,
            state: Mutex::new(SimState {
                next_adapter: 1,
                next_native_handle: 0x1000,
                ..SimState::default()
            }),
        }
    }

    /// Convenience: one 1080p60 output named `SIM1` showing `window`
    pub fn single_1080p60(clock: &'static Clock, window: WindowHandle) -> Self {
        let display = Self::new(clock);
        display.add_output(
            "SIM1",
            DisplayTiming {
                total_scanlines: 1125,
                active_scanlines: 1080,
                refresh: super::RefreshRate::new(60, 1),
            },
        );
        display.attach_window(window, "SIM1");
        display
    }

    /// Add (or replace) an output
    pub fn add_output(&self, name: &str, timing: DisplayTiming) {
        let mut state = self.state.lock();
        let native_handle = state.next_native_handle;
        state.next_native_handle += 1;
        state.outputs.insert(
            name.to_owned(),
            SimOutput {
                timing,
                phase_ns: 0,
                native_handle,
            },
        );
    }

    /// Change an output's timing, as a display mode switch would
    pub fn set_timing(&self, name: &str, timing: DisplayTiming) {
        if let Some(output) = self.state.lock().outputs.get_mut(name) {
            output.timing = timing;
        }
    }

    /// Shift an output's scan position by `phase_ns`
    pub fn set_phase_ns(&self, name: &str, phase_ns: u64) {
        if let Some(output) = self.state.lock().outputs.get_mut(name) {
            output.phase_ns = phase_ns;
        }
    }

    /// Unplug an output. Open adapters on it start failing.
    pub fn remove_output(&self, name: &str) {
        let mut state = self.state.lock();
        state.outputs.remove(name);
        state.windows.retain(|_, output| output != name);
        debug!("Simulated output {} removed", name);
    }

    /// Place `window` on output `name`
    pub fn attach_window(&self, window: WindowHandle, name: &str) {
        self.state.lock().windows.insert(window, name.to_owned());
    }

    /// Minimize or destroy `window`
    pub fn detach_window(&self, window: WindowHandle) {
        self.state.lock().windows.remove(&window);
    }

    /// Make the next `count` scan position queries fail
    pub fn fail_next_queries(&self, count: u32) {
        self.state.lock().failing_queries = count;
    }

    /// Simulated driver latency of each scan position query
    pub fn set_query_latency(&self, latency: Duration) {
        self.state.lock().query_latency = latency;
    }

    /// Simulated cost of each display configuration query
    pub fn set_timing_query_latency(&self, latency: Duration) {
        self.state.lock().timing_latency = latency;
    }

    /// Number of adapters currently open
    pub fn open_adapter_count(&self) -> usize {
        self.state.lock().open_adapters.len()
    }

    /// Scanline output `name` is on at `at`
    pub fn scanline_at(&self, name: &str, at: ClockSample) -> Option<u32> {
        let state = self.state.lock();
        let output = state.outputs.get(name)?;
        Some(self.scanline_of(output, at))
    }

    fn scanline_of(&self, output: &SimOutput, at: ClockSample) -> u32 {
        let refresh_ns = output.timing.refresh.interval_ns();
        if refresh_ns == 0 || output.timing.total_scanlines == 0 {
            return 0;
        }
        let t_ns = self.clock.to_nanos(at).wrapping_add(output.phase_ns);
        let into_frame = (t_ns % refresh_ns) as u128;
        (into_frame * output.timing.total_scanlines as u128 / refresh_ns as u128) as u32
    }
}

impl DisplayBackend for SimulatedDisplay {
    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    fn resolve_output(&self, window: WindowHandle) -> Result<OutputDescriptor> {
        let state = self.state.lock();
        let name = state
            .windows
            .get(&window)
            .ok_or(DisplayError::NoOutputForWindow(window.0))?;
        let output = state
            .outputs
            .get(name)
            .ok_or_else(|| DisplayError::OutputNotFound(name.clone()))?;
        Ok(OutputDescriptor {
            name: name.clone(),
            native_handle: output.native_handle,
        })
    }

    fn open_adapter(&self, output: &OutputDescriptor) -> Result<AdapterBinding> {
        let mut state = self.state.lock();
        if !state.outputs.contains_key(&output.name) {
            return Err(DisplayError::AdapterOpenFailed {
                output: output.name.clone(),
                reason: "output disconnected".into(),
            });
        }
        let handle = state.next_adapter;
        state.next_adapter += 1;
        state.open_adapters.insert(handle, output.name.clone());
        Ok(AdapterBinding {
            adapter: AdapterHandle(handle),
            source_id: 0,
            output_name: output.name.clone(),
        })
    }

    fn close_adapter(&self, binding: &AdapterBinding) {
        self.state.lock().open_adapters.remove(&binding.adapter.0);
    }

    fn scan_position(&self, binding: &AdapterBinding) -> Result<ScanPosition> {
        let latency = {
            let mut state = self.state.lock();
            if state.failing_queries > 0 {
                state.failing_queries -= 1;
                return Err(DisplayError::ScanlineQueryFailed("injected failure".into()));
            }
            if !state.open_adapters.contains_key(&binding.adapter.0) {
                return Err(DisplayError::ScanlineQueryFailed(format!(
                    "stale adapter {:?}",
                    binding.adapter
                )));
            }
            state.query_latency
        };

        // Position is latched halfway through the simulated driver call
        if !latency.is_zero() {
            std::thread::sleep(latency / 2);
        }
        let latched = self.clock.now();
        let position = {
            let state = self.state.lock();
            let output = state
                .outputs
                .get(&binding.output_name)
                .ok_or_else(|| DisplayError::OutputNotFound(binding.output_name.clone()))?;
            let scanline = self.scanline_of(output, latched);
            ScanPosition {
                scanline,
                in_vblank: scanline >= output.timing.active_scanlines,
            }
        };
        if !latency.is_zero() {
            std::thread::sleep(latency / 2);
        }
        Ok(position)
    }

    fn query_timing(&self, output: &OutputDescriptor) -> Result<DisplayTiming> {
        let (timing, latency) = {
            let state = self.state.lock();
            let timing = state.outputs.get(&output.name).map(|o| o.timing);
            (timing, state.timing_latency)
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        timing.ok_or_else(|| DisplayError::TimingQueryFailed(format!("{} not present", output.name)))
    }
}
