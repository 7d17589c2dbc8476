//! Latency backend statistics

use serde::Serialize;

use super::{FrameId, LatencyMarker};

/// Per-backend counters, readable as diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    /// Backend identifier ("reflex", "anti_lag", ...)
    pub backend: &'static str,
    /// Current frame id
    pub frame_id: u64,
    /// Markers forwarded to the driver
    pub markers_sent: u64,
    /// Markers accepted but not forwarded (unsupported or disabled)
    pub markers_ignored: u64,
    /// Sleep (or per-frame update) calls that reached the driver
    pub sleeps: u64,
    /// Driver calls that failed
    pub failures: u64,
    /// Sleep-mode configurations applied
    pub config_applies: u64,
}

impl LatencyStats {
    /// Zeroed stats for a backend
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            frame_id: 0,
            markers_sent: 0,
            markers_ignored: 0,
            sleeps: 0,
            failures: 0,
            config_applies: 0,
        }
    }
}

/// Marker timestamps recorded for one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameTimings {
    /// Frame these markers belong to
    pub frame_id: FrameId,
    /// Nanosecond timestamps indexed by [`LatencyMarker::index`]
    pub marker_ns: [Option<u64>; 7],
}

impl FrameTimings {
    /// Empty record for `frame_id`
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            marker_ns: [None; 7],
        }
    }

    /// Stamp `marker`. A repeated marker keeps its latest time.
    pub fn record(&mut self, marker: LatencyMarker, at_ns: u64) {
        self.marker_ns[marker.index()] = Some(at_ns);
    }

    /// Timestamp of `marker`, if seen
    pub fn get(&self, marker: LatencyMarker) -> Option<u64> {
        self.marker_ns[marker.index()]
    }

    /// Nanoseconds from `from` to `to`, if both were seen in order
    pub fn span_ns(&self, from: LatencyMarker, to: LatencyMarker) -> Option<u64> {
        let start = self.get(from)?;
        let end = self.get(to)?;
        end.checked_sub(start)
    }

    /// Simulation start to present end
    pub fn total_ns(&self) -> Option<u64> {
        self.span_ns(LatencyMarker::SimStart, LatencyMarker::PresentEnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_spans() {
        let mut timings = FrameTimings::new(FrameId(3));
        timings.record(LatencyMarker::SimStart, 1_000);
        timings.record(LatencyMarker::PresentStart, 9_000);
        timings.record(LatencyMarker::PresentEnd, 10_500);

        assert_eq!(timings.total_ns(), Some(9_500));
        assert_eq!(
            timings.span_ns(LatencyMarker::PresentStart, LatencyMarker::PresentEnd),
            Some(1_500)
        );
        assert_eq!(timings.get(LatencyMarker::SimEnd), None);
        assert_eq!(
            timings.span_ns(LatencyMarker::PresentEnd, LatencyMarker::SimStart),
            None
        );
    }
}
