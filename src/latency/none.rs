//! Pass-through backend used when no latency technology is selected

use super::{
    BackendCapabilities, DeviceHandle, FrameId, LatencyMarker, LatencyStats, LatencyTechnology,
    TechnologyKind,
};

/// Counts frames and does nothing else
#[derive(Debug)]
pub struct NoneBackend {
    initialized: bool,
    frame_id: FrameId,
    stats: LatencyStats,
}

impl NoneBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self {
            initialized: false,
            frame_id: FrameId::default(),
            stats: LatencyStats::new(TechnologyKind::None.name()),
        }
    }
}

impl Default for NoneBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTechnology for NoneBackend {
    fn kind(&self) -> TechnologyKind {
        TechnologyKind::None
    }

    fn initialize(&mut self, _device: DeviceHandle) -> bool {
        self.initialized = true;
        true
    }

    fn shutdown(&mut self) {
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn apply_sleep_mode(&mut self, _low_latency: bool, _boost: bool, _use_markers: bool, _fps_limit: f64) -> bool {
        self.stats.config_applies += 1;
        true
    }

    fn set_marker(&mut self, marker: LatencyMarker) -> bool {
        if marker == LatencyMarker::SimStart {
            self.stats.frame_id = self.frame_id.advance().0;
        }
        self.stats.markers_ignored += 1;
        true
    }

    fn sleep(&mut self) -> bool {
        true
    }

    fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn stats(&self) -> LatencyStats {
        self.stats
    }
}
