//! Vendor driver seams
//!
//! Thin traits over each vendor SDK's entry points. The SDK bindings
//! themselves live with the host instrumentation layer, which hands them
//! over through a [`DriverProvider`].

use super::{DeviceHandle, LatencyError, LatencyMarker, Result};

/// Reflex sleep-mode parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReflexSleepParams {
    /// Low latency mode
    pub low_latency: bool,
    /// Keep GPU clocks high
    pub boost: bool,
    /// Markers drive the optimizer
    pub use_markers: bool,
    /// Frame cap as a minimum interval (0 = none)
    pub minimum_interval_us: u32,
}

/// Vendor A: markers, boost and an explicit sleep
#[cfg_attr(test, mockall::automock)]
pub trait ReflexDriver: Send {
    /// Attach to the device
    fn init(&mut self, device: DeviceHandle) -> Result<()>;
    /// Detach
    fn shutdown(&mut self);
    /// Configure sleep mode
    fn set_sleep_mode(&mut self, params: ReflexSleepParams) -> Result<()>;
    /// Tag `frame_id` with `marker`
    fn set_marker(&mut self, frame_id: u64, marker: LatencyMarker) -> Result<()>;
    /// Block until the optimizer releases the frame
    fn sleep(&mut self) -> Result<()>;
}

/// Vendor B: one per-frame update call that sleeps internally
#[cfg_attr(test, mockall::automock)]
pub trait AntiLagDriver: Send {
    /// Attach to the device
    fn init(&mut self, device: DeviceHandle) -> Result<()>;
    /// Detach
    fn shutdown(&mut self);
    /// Per-frame update; blocks to pace the frame when `enabled`
    fn update(&mut self, enabled: bool, max_fps: u32) -> Result<()>;
}

/// Vendor C: markers and an explicit sleep, no boost
#[cfg_attr(test, mockall::automock)]
pub trait XellDriver: Send {
    /// Attach to the device
    fn init(&mut self, device: DeviceHandle) -> Result<()>;
    /// Detach
    fn shutdown(&mut self);
    /// Configure sleep mode
    fn set_sleep_mode(&mut self, enabled: bool, minimum_interval_us: u32) -> Result<()>;
    /// Tag `frame_id` with `marker`
    fn add_marker(&mut self, frame_id: u64, marker: LatencyMarker) -> Result<()>;
    /// Block until the frame `frame_id` may start
    fn sleep(&mut self, frame_id: u64) -> Result<()>;
}

/// Source of vendor drivers.
///
/// Each call loads a fresh driver; failure means the technology is not
/// available on this machine.
pub trait DriverProvider: Send + Sync {
    /// Load the Reflex driver
    fn reflex(&self) -> Result<Box<dyn ReflexDriver>>;
    /// Load the Anti-Lag driver
    fn anti_lag(&self) -> Result<Box<dyn AntiLagDriver>>;
    /// Load the XeLL driver
    fn xell(&self) -> Result<Box<dyn XellDriver>>;
}

/// Provider for hosts without any vendor SDK; every load fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDrivers;

impl NoDrivers {
    fn unavailable(backend: &'static str) -> LatencyError {
        LatencyError::BackendUnavailable {
            backend,
            reason: "no SDK binding supplied".to_string(),
        }
    }
}

impl DriverProvider for NoDrivers {
    fn reflex(&self) -> Result<Box<dyn ReflexDriver>> {
        Err(Self::unavailable("reflex"))
    }

    fn anti_lag(&self) -> Result<Box<dyn AntiLagDriver>> {
        Err(Self::unavailable("anti_lag"))
    }

    fn xell(&self) -> Result<Box<dyn XellDriver>> {
        Err(Self::unavailable("xell"))
    }
}
