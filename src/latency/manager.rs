//! Latency manager
//!
//! Owns the single active backend and swaps it whole when the selected
//! technology changes. Safe to call from any thread; calls on the active
//! backend are serialized by one lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    create_backend, BackendCapabilities, DeviceHandle, DriverProvider, FrameTimings, LatencyConfig,
    LatencyMarker, LatencyStats, LatencyTechnology, TechnologyKind,
};
use crate::clock::Clock;

/// Frames of marker history kept for diagnostics
const TIMING_HISTORY: usize = 120;

/// Front end over the active latency backend
pub struct LatencyManager {
    provider: Arc<dyn DriverProvider>,
    clock: &'static Clock,
    backend: Mutex<Option<Box<dyn LatencyTechnology>>>,
    initialized: AtomicBool,
    config: RwLock<LatencyConfig>,
    device: Mutex<Option<DeviceHandle>>,
    timings: Mutex<VecDeque<FrameTimings>>,
}

impl LatencyManager {
    /// Create an idle manager
    pub fn new(clock: &'static Clock, provider: Arc<dyn DriverProvider>) -> Self {
        Self {
            provider,
            clock,
            backend: Mutex::new(None),
            initialized: AtomicBool::new(false),
            config: RwLock::new(LatencyConfig::default()),
            device: Mutex::new(None),
            timings: Mutex::new(VecDeque::with_capacity(TIMING_HISTORY)),
        }
    }

    /// Bring up the configured technology on `device`.
    ///
    /// Any previous backend is shut down first. Returns `false` if the
    /// technology is unavailable; the manager then stays uninitialized and
    /// every frame call is a cheap no-op.
    pub fn initialize(&self, device: DeviceHandle, config: LatencyConfig) -> bool {
        let mut slot = self.backend.lock();
        *self.device.lock() = Some(device);
        *self.config.write() = config.clone();
        self.start_backend(&mut slot, &config)
    }

    /// Replace the active backend with `kind`.
    ///
    /// The old backend is fully shut down before the new one initializes.
    /// On failure the manager is left uninitialized.
    pub fn switch_technology(&self, kind: TechnologyKind) -> bool {
        let mut slot = self.backend.lock();
        let config = {
            let mut current = self.config.write();
            let next = LatencyConfig {
                technology: kind,
                ..current.clone()
            };
            *current = next.clone();
            next
        };
        self.start_backend(&mut slot, &config)
    }

    /// Caller holds the backend lock, so the stored config and the active
    /// backend change together.
    fn start_backend(&self, slot: &mut Option<Box<dyn LatencyTechnology>>, config: &LatencyConfig) -> bool {
        let kind = config.technology;
        self.initialized.store(false, Ordering::Release);

        if let Some(mut old) = slot.take() {
            debug!("Shutting down {} backend", old.kind());
            old.shutdown();
        }
        self.timings.lock().clear();

        let Some(device) = *self.device.lock() else {
            warn!("Latency backend {} requested before a device was supplied", kind);
            return false;
        };

        let mut backend = create_backend(kind, self.provider.clone());
        if !backend.initialize(device) {
            warn!("Latency technology {} unavailable, running without it", kind);
            return false;
        }

        if !backend.apply_sleep_mode(
            config.low_latency_mode,
            config.boost_mode,
            config.use_markers,
            config.target_fps,
        ) {
            warn!("{} rejected the initial sleep mode", kind);
        }

        info!("Latency technology active: {}", kind);
        *slot = Some(backend);
        self.initialized.store(true, Ordering::Release);
        true
    }

    /// Replace the whole configuration.
    ///
    /// A changed technology triggers a switch; otherwise the new settings
    /// are pushed to the active backend.
    pub fn set_config(&self, config: LatencyConfig) -> bool {
        let mut slot = self.backend.lock();
        let previous = std::mem::replace(&mut *self.config.write(), config.clone()).technology;

        if config.technology != previous || !self.is_initialized() {
            return self.start_backend(&mut slot, &config);
        }

        match slot.as_mut() {
            Some(backend) => backend.apply_sleep_mode(
                config.low_latency_mode,
                config.boost_mode,
                config.use_markers,
                config.target_fps,
            ),
            None => false,
        }
    }

    /// Current configuration snapshot
    pub fn config(&self) -> LatencyConfig {
        self.config.read().clone()
    }

    /// Shut the active backend down
    pub fn shutdown(&self) {
        let mut slot = self.backend.lock();
        self.initialized.store(false, Ordering::Release);
        if let Some(mut backend) = slot.take() {
            backend.shutdown();
            info!("Latency technology {} shut down", backend.kind());
        }
    }

    /// Whether a backend is active
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Tag the current frame. Returns `false` if no backend is active or
    /// the backend reported a failure.
    pub fn set_marker(&self, marker: LatencyMarker) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let mut slot = self.backend.lock();
        let Some(backend) = slot.as_mut() else {
            return false;
        };

        let ok = backend.set_marker(marker);
        let frame_id = backend.frame_id();
        drop(slot);

        let at_ns = self.clock.to_nanos(self.clock.now());
        let mut timings = self.timings.lock();
        match timings.back_mut() {
            Some(current) if current.frame_id == frame_id => current.record(marker, at_ns),
            _ => {
                if timings.len() == TIMING_HISTORY {
                    timings.pop_front();
                }
                let mut frame = FrameTimings::new(frame_id);
                frame.record(marker, at_ns);
                timings.push_back(frame);
            }
        }
        ok
    }

    /// Run the backend's pacing sleep
    pub fn sleep(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        self.backend.lock().as_mut().map(|b| b.sleep()).unwrap_or(false)
    }

    /// Active technology, `None` when uninitialized
    pub fn technology(&self) -> Option<TechnologyKind> {
        self.backend.lock().as_ref().map(|b| b.kind())
    }

    /// Capabilities of the active backend
    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend
            .lock()
            .as_ref()
            .map(|b| b.capabilities())
            .unwrap_or_default()
    }

    /// Counters of the active backend
    pub fn stats(&self) -> Option<LatencyStats> {
        self.backend.lock().as_ref().map(|b| b.stats())
    }

    /// Recent per-frame marker timestamps, oldest first
    pub fn frame_timings(&self) -> Vec<FrameTimings> {
        self.timings.lock().iter().cloned().collect()
    }
}

impl Drop for LatencyManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
