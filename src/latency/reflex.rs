//! Vendor A backend (Reflex)
//!
//! Full feature set: pipeline markers, boost, and an explicit sleep that
//! the host calls once per frame before sampling input.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::driver::{DriverProvider, ReflexDriver, ReflexSleepParams};
use super::{
    minimum_interval_us, BackendCapabilities, DeviceHandle, FrameId, LatencyMarker, LatencyStats,
    LatencyTechnology, TechnologyKind,
};

const NAME: &str = "reflex";

/// Reflex latency backend
pub struct ReflexBackend {
    provider: Arc<dyn DriverProvider>,
    driver: Option<Box<dyn ReflexDriver>>,
    frame_id: FrameId,
    use_markers: bool,
    stats: LatencyStats,
}

impl ReflexBackend {
    /// Create an uninitialized backend
    pub fn new(provider: Arc<dyn DriverProvider>) -> Self {
        Self {
            provider,
            driver: None,
            frame_id: FrameId::default(),
            use_markers: true,
            stats: LatencyStats::new(NAME),
        }
    }
}

impl LatencyTechnology for ReflexBackend {
    fn kind(&self) -> TechnologyKind {
        TechnologyKind::Reflex
    }

    fn initialize(&mut self, device: DeviceHandle) -> bool {
        if self.driver.is_some() {
            return true;
        }

        let mut driver = match self.provider.reflex() {
            Ok(driver) => driver,
            Err(e) => {
                info!("Reflex unavailable: {}", e);
                return false;
            }
        };

        if let Err(e) = driver.init(device) {
            warn!("Reflex initialization failed: {}", e);
            return false;
        }

        info!("Reflex initialized");
        self.driver = Some(driver);
        true
    }

    fn shutdown(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
            debug!("Reflex shut down");
        }
    }

    fn is_initialized(&self) -> bool {
        self.driver.is_some()
    }

    fn apply_sleep_mode(&mut self, low_latency: bool, boost: bool, use_markers: bool, fps_limit: f64) -> bool {
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };

        let params = ReflexSleepParams {
            low_latency,
            boost,
            use_markers,
            minimum_interval_us: minimum_interval_us(fps_limit),
        };
        match driver.set_sleep_mode(params) {
            Ok(()) => {
                debug!("Reflex sleep mode: {:?}", params);
                self.use_markers = use_markers;
                self.stats.config_applies += 1;
                true
            }
            Err(e) => {
                warn!("Reflex sleep mode rejected: {}", e);
                self.stats.failures += 1;
                false
            }
        }
    }

    fn set_marker(&mut self, marker: LatencyMarker) -> bool {
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };

        if marker == LatencyMarker::SimStart {
            self.stats.frame_id = self.frame_id.advance().0;
        }
        if !self.use_markers {
            self.stats.markers_ignored += 1;
            return true;
        }

        match driver.set_marker(self.frame_id.0, marker) {
            Ok(()) => {
                self.stats.markers_sent += 1;
                true
            }
            Err(e) => {
                trace!("Reflex marker {:?} failed: {}", marker, e);
                self.stats.failures += 1;
                false
            }
        }
    }

    fn sleep(&mut self) -> bool {
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };
        match driver.sleep() {
            Ok(()) => {
                self.stats.sleeps += 1;
                true
            }
            Err(e) => {
                trace!("Reflex sleep failed: {}", e);
                self.stats.failures += 1;
                false
            }
        }
    }

    fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            markers: true,
            boost: true,
            explicit_sleep: true,
            frame_limit: true,
        }
    }

    fn stats(&self) -> LatencyStats {
        self.stats
    }
}

impl Drop for ReflexBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
