//! Clock-driven stand-ins for the vendor SDKs
//!
//! Each simulated driver enforces its frame cap by waiting on the shared
//! clock, which is all the demo binary and integration tests need from a
//! real SDK. Individual technologies can be marked unavailable to exercise
//! the failure paths.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::trace;

use super::driver::{AntiLagDriver, DriverProvider, ReflexDriver, ReflexSleepParams, XellDriver};
use super::{DeviceHandle, LatencyError, LatencyMarker, Result, TechnologyKind};
use crate::clock::{Clock, ClockSample, WaitTimer};

/// Frame-cap state shared by all simulated drivers
struct Pacer {
    clock: &'static Clock,
    timer: WaitTimer,
    interval_us: u32,
    last_release: Option<ClockSample>,
}

impl Pacer {
    fn new(clock: &'static Clock) -> Self {
        Self {
            clock,
            timer: WaitTimer::new(),
            interval_us: 0,
            last_release: None,
        }
    }

    fn wait(&mut self) {
        if self.interval_us > 0 {
            if let Some(last) = self.last_release {
                let interval = self.clock.duration_from_nanos(u64::from(self.interval_us) * 1_000);
                self.clock.wait_until(last + interval, &mut self.timer);
            }
        }
        self.last_release = Some(self.clock.now());
    }
}

fn require_device(backend: &'static str, device: DeviceHandle) -> Result<()> {
    if device.0 == 0 {
        return Err(LatencyError::DeviceRejected {
            backend,
            reason: "null device".into(),
        });
    }
    Ok(())
}

struct SimReflex {
    pacer: Pacer,
    params: ReflexSleepParams,
}

impl ReflexDriver for SimReflex {
    fn init(&mut self, device: DeviceHandle) -> Result<()> {
        require_device("reflex", device)
    }

    fn shutdown(&mut self) {}

    fn set_sleep_mode(&mut self, params: ReflexSleepParams) -> Result<()> {
        self.params = params;
        self.pacer.interval_us = params.minimum_interval_us;
        Ok(())
    }

    fn set_marker(&mut self, frame_id: u64, marker: LatencyMarker) -> Result<()> {
        trace!("sim reflex frame {} {:?}", frame_id, marker);
        Ok(())
    }

    fn sleep(&mut self) -> Result<()> {
        if self.params.low_latency {
            self.pacer.wait();
        }
        Ok(())
    }
}

struct SimAntiLag {
    pacer: Pacer,
}

impl AntiLagDriver for SimAntiLag {
    fn init(&mut self, device: DeviceHandle) -> Result<()> {
        require_device("anti_lag", device)
    }

    fn shutdown(&mut self) {}

    fn update(&mut self, enabled: bool, max_fps: u32) -> Result<()> {
        if enabled {
            self.pacer.interval_us = if max_fps > 0 { 1_000_000 / max_fps } else { 0 };
            self.pacer.wait();
        }
        Ok(())
    }
}

struct SimXell {
    pacer: Pacer,
    enabled: bool,
    last_frame: u64,
}

impl XellDriver for SimXell {
    fn init(&mut self, device: DeviceHandle) -> Result<()> {
        require_device("xell", device)
    }

    fn shutdown(&mut self) {}

    fn set_sleep_mode(&mut self, enabled: bool, minimum_interval_us: u32) -> Result<()> {
        self.enabled = enabled;
        self.pacer.interval_us = minimum_interval_us;
        Ok(())
    }

    fn add_marker(&mut self, frame_id: u64, marker: LatencyMarker) -> Result<()> {
        if frame_id < self.last_frame {
            return Err(LatencyError::CallFailed {
                backend: "xell",
                call: "add_marker",
                reason: format!("frame {} is older than {}", frame_id, self.last_frame),
            });
        }
        self.last_frame = frame_id;
        trace!("sim xell frame {} {:?}", frame_id, marker);
        Ok(())
    }

    fn sleep(&mut self, frame_id: u64) -> Result<()> {
        self.last_frame = self.last_frame.max(frame_id);
        if self.enabled {
            self.pacer.wait();
        }
        Ok(())
    }
}

/// Provider that hands out simulated drivers
pub struct SimulatedDrivers {
    clock: &'static Clock,
    unavailable: Mutex<HashSet<TechnologyKind>>,
}

impl SimulatedDrivers {
    /// All technologies available
    pub fn new(clock: &'static Clock) -> Self {
        Self {
            clock,
            unavailable: Mutex::new(HashSet::new()),
        }
    }

    /// Make loading `kind` fail from now on (or succeed again)
    pub fn set_available(&self, kind: TechnologyKind, available: bool) {
        let mut unavailable = self.unavailable.lock();
        if available {
            unavailable.remove(&kind);
        } else {
            unavailable.insert(kind);
        }
    }

    fn check(&self, kind: TechnologyKind) -> Result<()> {
        if self.unavailable.lock().contains(&kind) {
            return Err(LatencyError::BackendUnavailable {
                backend: kind.name(),
                reason: "disabled in simulation".into(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedDrivers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDrivers")
            .field("unavailable", &*self.unavailable.lock())
            .finish()
    }
}

impl DriverProvider for SimulatedDrivers {
    fn reflex(&self) -> Result<Box<dyn ReflexDriver>> {
        self.check(TechnologyKind::Reflex)?;
        Ok(Box::new(SimReflex {
            pacer: Pacer::new(self.clock),
            params: ReflexSleepParams::default(),
        }))
    }

    fn anti_lag(&self) -> Result<Box<dyn AntiLagDriver>> {
        self.check(TechnologyKind::AntiLag)?;
        Ok(Box::new(SimAntiLag {
            pacer: Pacer::new(self.clock),
        }))
    }

    fn xell(&self) -> Result<Box<dyn XellDriver>> {
        self.check(TechnologyKind::Xell)?;
        Ok(Box::new(SimXell {
            pacer: Pacer::new(self.clock),
            enabled: false,
            last_frame: 0,
        }))
    }
}
