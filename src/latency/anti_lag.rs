//! Vendor B backend (Anti-Lag)
//!
//! No markers, no boost, no explicit sleep. The SDK paces inside a single
//! per-frame update call, which this backend issues on the `SimStart`
//! boundary so the wait lands before input is sampled.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::driver::{AntiLagDriver, DriverProvider};
use super::{
    BackendCapabilities, DeviceHandle, FrameId, LatencyMarker, LatencyStats, LatencyTechnology,
    TechnologyKind,
};

const NAME: &str = "anti_lag";

/// Anti-Lag latency backend
pub struct AntiLagBackend {
    provider: Arc<dyn DriverProvider>,
    driver: Option<Box<dyn AntiLagDriver>>,
    frame_id: FrameId,
    enabled: bool,
    max_fps: u32,
    stats: LatencyStats,
}

impl AntiLagBackend {
    /// Create an uninitialized backend
    pub fn new(provider: Arc<dyn DriverProvider>) -> Self {
        Self {
            provider,
            driver: None,
            frame_id: FrameId::default(),
            enabled: false,
            max_fps: 0,
            stats: LatencyStats::new(NAME),
        }
    }
}

impl LatencyTechnology for AntiLagBackend {
    fn kind(&self) -> TechnologyKind {
        TechnologyKind::AntiLag
    }

    fn initialize(&mut self, device: DeviceHandle) -> bool {
        if self.driver.is_some() {
            return true;
        }

        let mut driver = match self.provider.anti_lag() {
            Ok(driver) => driver,
            Err(e) => {
                info!("Anti-Lag unavailable: {}", e);
                return false;
            }
        };

        if let Err(e) = driver.init(device) {
            warn!("Anti-Lag initialization failed: {}", e);
            return false;
        }

        info!("Anti-Lag initialized");
        self.driver = Some(driver);
        true
    }

    fn shutdown(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
            debug!("Anti-Lag shut down");
        }
    }

    fn is_initialized(&self) -> bool {
        self.driver.is_some()
    }

    fn apply_sleep_mode(&mut self, low_latency: bool, _boost: bool, _use_markers: bool, fps_limit: f64) -> bool {
        if self.driver.is_none() {
            return false;
        }
        // Settings take effect on the next per-frame update
        self.enabled = low_latency;
        self.max_fps = if fps_limit.is_finite() && fps_limit > 0.0 {
            fps_limit.round() as u32
        } else {
            0
        };
        self.stats.config_applies += 1;
        debug!("Anti-Lag enabled={} max_fps={}", self.enabled, self.max_fps);
        true
    }

    fn set_marker(&mut self, marker: LatencyMarker) -> bool {
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };

        self.stats.markers_ignored += 1;
        if marker != LatencyMarker::SimStart {
            return true;
        }

        self.stats.frame_id = self.frame_id.advance().0;
        match driver.update(self.enabled, self.max_fps) {
            Ok(()) => self.stats.sleeps += 1,
            Err(e) => {
                trace!("Anti-Lag update failed: {}", e);
                self.stats.failures += 1;
            }
        }
        true
    }

    fn sleep(&mut self) -> bool {
        // Pacing happens inside the per-frame update
        true
    }

    fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            markers: false,
            boost: false,
            explicit_sleep: false,
            frame_limit: true,
        }
    }

    fn stats(&self) -> LatencyStats {
        self.stats
    }
}

impl Drop for AntiLagBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
