//! Vendor C backend (XeLL)
//!
//! Markers and an explicit per-frame sleep keyed by frame id. No boost
//! mode and no input-sample marker.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::driver::{DriverProvider, XellDriver};
use super::{
    minimum_interval_us, BackendCapabilities, DeviceHandle, FrameId, LatencyMarker, LatencyStats,
    LatencyTechnology, TechnologyKind,
};

const NAME: &str = "xell";

/// XeLL latency backend
pub struct XellBackend {
    provider: Arc<dyn DriverProvider>,
    driver: Option<Box<dyn XellDriver>>,
    frame_id: FrameId,
    use_markers: bool,
    stats: LatencyStats,
}

impl XellBackend {
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

impl LatencyTechnology for XellBackend {
    fn kind(&self) -> TechnologyKind {
        TechnologyKind::Xell
    }

    fn initialize(&mut self, device: DeviceHandle) -> bool {
        if self.driver.is_some() {
            return true;
        }

        let mut driver = match self.provider.xell() {
            Ok(driver) => driver,
            Err(e) => {
                info!("XeLL unavailable: {}", e);
                return false;
            }
        };

        if let Err(e) = driver.init(device) {
            warn!("XeLL initialization failed: {}", e);
            return false;
        }

        info!("XeLL initialized");
        self.driver = Some(driver);
        true
    }

    fn shutdown(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
            debug!("XeLL shut down");
        }
    }

    fn is_initialized(&self) -> bool {
        self.driver.is_some()
    }

    fn apply_sleep_mode(&mut self, low_latency: bool, _boost: bool, use_markers: bool, fps_limit: f64) -> bool {
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };

        match driver.set_sleep_mode(low_latency, minimum_interval_us(fps_limit)) {
            Ok(()) => {
                self.use_markers = use_markers;
                self.stats.config_applies += 1;
                true
            }
            Err(e) => {
                warn!("XeLL sleep mode rejected: {}", e);
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
        if !self.use_markers || marker == LatencyMarker::InputSample {
            self.stats.markers_ignored += 1;
            return true;
        }

        match driver.add_marker(self.frame_id.0, marker) {
            Ok(()) => {
                self.stats.markers_sent += 1;
                true
            }
            Err(e) => {
                trace!("XeLL marker {:?} failed: {}", marker, e);
                self.stats.failures += 1;
                false
            }
        }
    }

    fn sleep(&mut self) -> bool {
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };
        match driver.sleep(self.frame_id.0) {
            Ok(()) => {
                self.stats.sleeps += 1;
                true
            }
            Err(e) => {
                trace!("XeLL sleep failed: {}", e);
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
            boost: false,
            explicit_sleep: true,
            frame_limit: true,
        }
    }

    fn stats(&self) -> LatencyStats {
        self.stats
    }
}

impl Drop for XellBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::driver::MockXellDriver;
    use crate::latency::{AntiLagDriver, LatencyError, NoDrivers, ReflexDriver, Result};
    use mockall::predicate::{always, eq};
    use parking_lot::Mutex;

    struct OneShot(Mutex<Option<MockXellDriver>>);

    impl DriverProvider for OneShot {
        fn reflex(&self) -> Result<Box<dyn ReflexDriver>> {
            NoDrivers.reflex()
        }
        fn anti_lag(&self) -> Result<Box<dyn AntiLagDriver>> {
            NoDrivers.anti_lag()
        }
        fn xell(&self) -> Result<Box<dyn XellDriver>> {
            self.0
                .lock()
                .take()
                .map(|d| Box::new(d) as Box<dyn XellDriver>)
                .ok_or(LatencyError::BackendUnavailable {
                    backend: NAME,
                    reason: "already taken".into(),
                })
        }
    }

    fn backend_with(driver: MockXellDriver) -> XellBackend {
        XellBackend::new(Arc::new(OneShot(Mutex::new(Some(driver)))))
    }

    #[test]
    fn test_boost_is_ignored() {
        let mut driver = MockXellDriver::new();
        driver.expect_init().returning(|_| Ok(()));
        driver
            .expect_set_sleep_mode()
            .with(eq(true), eq(0))
            .times(1)
            .returning(|_, _| Ok(()));
        driver.expect_shutdown().return_const(());

        let mut backend = backend_with(driver);
        assert!(backend.initialize(DeviceHandle(2)));
        assert!(backend.apply_sleep_mode(true, true, true, 0.0));
        assert!(!backend.capabilities().boost);
    }

    #[test]
    fn test_sleep_uses_current_frame() {
        let mut driver = MockXellDriver::new();
        driver.expect_init().returning(|_| Ok(()));
        driver.expect_add_marker().with(eq(1), always()).returning(|_, _| Ok(()));
        driver.expect_sleep().with(eq(1)).times(1).returning(|_| Ok(()));
        driver.expect_shutdown().return_const(());

        let mut backend = backend_with(driver);
        assert!(backend.initialize(DeviceHandle(2)));
        assert!(backend.set_marker(LatencyMarker::SimStart));
        assert!(backend.sleep());
        assert!(backend.set_marker(LatencyMarker::PresentEnd));
        assert_eq!(backend.stats().markers_sent, 2);
    }

    #[test]
    fn test_input_sample_marker_not_forwarded() {
        let mut driver = MockXellDriver::new();
        driver.expect_init().returning(|_| Ok(()));
        driver.expect_add_marker().never();
        driver.expect_shutdown().return_const(());

        let mut backend = backend_with(driver);
        assert!(backend.initialize(DeviceHandle(2)));
        assert!(backend.set_marker(LatencyMarker::InputSample));
        assert_eq!(backend.stats().markers_ignored, 1);
    }

    #[test]
    fn test_marker_failure_reported() {
        let mut driver = MockXellDriver::new();
        driver.expect_init().returning(|_| Ok(()));
        driver.expect_add_marker().returning(|_, _| {
            Err(LatencyError::CallFailed {
                backend: NAME,
                call: "add_marker",
                reason: "bad frame".into(),
            })
        });
        driver.expect_shutdown().return_const(());

        let mut backend = backend_with(driver);
        assert!(backend.initialize(DeviceHandle(2)));
        assert!(!backend.set_marker(LatencyMarker::SimStart));
        assert_eq!(backend.frame_id(), FrameId(1));
        assert_eq!(backend.stats().failures, 1);
    }
}
