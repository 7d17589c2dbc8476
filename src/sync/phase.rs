//! Phase Tracker
//!
//! Discrete phase-locked loop between a purely time-driven scanline model
//! and sparse scan-position observations.
//!
//! # Algorithm
//!
//! For each sample:
//! 1. Track the shortest query duration ever seen. Samples that took
//!    `trusted_query_factor` times longer than that are discarded.
//! 2. `expected = (t mod refresh) * total / refresh`
//! 3. `raw = (observed - expected) mod total`
//! 4. Move the offset toward `raw` along the shorter way around the circle
//!    and renormalize to `[0, total)`.
//!
//! The per-sample correction is at most half a revolution, so a wrap near
//! zero never drags the offset a full frame.

use tracing::trace;

use super::{nearest_representative, wrap_scanline, ScanSample};
use crate::display::TimingSnapshot;

/// Default multiple of the fastest query that still counts as trustworthy
pub const DEFAULT_TRUSTED_QUERY_FACTOR: f64 = 2.0;

/// Result of feeding one sample to the tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseUpdate {
    /// Offset moved by `correction` scanlines
    Applied {
        /// Signed change applied to the offset before renormalization
        correction: f64,
    },
    /// Query took too long to be trusted
    Untrusted,
    /// Display model not populated yet
    ModelNotReady,
}

/// Running phase correction for one bound display
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    offset: f64,
    min_query_ns: Option<u64>,
    trusted_query_factor: f64,
    correction_gain: f64,
    applied: u64,
    rejected: u64,
}

impl PhaseTracker {
    /// Create a tracker.
    ///
    /// `correction_gain` of 1.0 snaps straight to each trusted observation;
    /// smaller values low-pass the correction.
    pub fn new(trusted_query_factor: f64, correction_gain: f64) -> Self {
        Self {
            offset: 0.0,
            min_query_ns: None,
            trusted_query_factor: trusted_query_factor.max(1.0),
            correction_gain: correction_gain.clamp(0.0, 1.0),
            applied: 0,
            rejected: 0,
        }
    }

    /// Current offset in `[0, total_scanlines)`
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Fastest query seen since the last reset
    pub fn min_query_ns(&self) -> Option<u64> {
        self.min_query_ns
    }

    /// Samples that moved the offset
    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    /// Samples discarded as untrusted
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Forget everything learned about the previous display
    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.min_query_ns = None;
    }

    /// Fold one sample into the correction.
    pub fn update(
        &mut self,
        sample: &ScanSample,
        model: TimingSnapshot,
        ticks_per_second: u64,
    ) -> PhaseUpdate {
        let query_ns = sample.query_duration.to_nanos(ticks_per_second).max(1);
        let min_ns = self.min_query_ns.map_or(query_ns, |m| m.min(query_ns));
        self.min_query_ns = Some(min_ns);

        if !model.is_ready() {
            return PhaseUpdate::ModelNotReady;
        }

        if query_ns as f64 >= min_ns as f64 * self.trusted_query_factor {
            self.rejected += 1;
            trace!(
                "Discarding scan sample: query {}ns vs floor {}ns",
                query_ns,
                min_ns
            );
            return PhaseUpdate::Untrusted;
        }

        let total = model.total_scanlines as f64;
        let refresh_ns = model.refresh_interval_ns;

        let t_ns = sample.sample_mid_time.to_nanos(ticks_per_second);
        let into_frame = (t_ns % refresh_ns) as f64;
        let expected = into_frame * total / refresh_ns as f64;

        let raw = wrap_scanline(sample.scanline as f64 - expected, total);
        let correction =
            nearest_representative(raw - self.offset, total) * self.correction_gain;

        self.offset = wrap_scanline(self.offset + correction, total);
        self.applied += 1;

        PhaseUpdate::Applied { correction }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRUSTED_QUERY_FACTOR, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockSample, TickDuration};
    use proptest::prelude::*;

    const NS: u64 = 1_000_000_000;

    fn model_1080p60() -> TimingSnapshot {
        TimingSnapshot {
            total_scanlines: 1125,
            active_scanlines: 1080,
            refresh_interval_ns: 16_666_667,
        }
    }

    fn sample(t_ns: u64, scanline: u32, query_ns: u64) -> ScanSample {
        ScanSample {
            sample_mid_time: ClockSample(t_ns),
            scanline,
            query_duration: TickDuration(query_ns),
        }
    }

    #[test]
    fn test_first_trusted_sample_snaps_offset() {
        let mut tracker = PhaseTracker::default();
        // Frame boundary: expected line 0, observed 300
        let update = tracker.update(&sample(16_666_667 * 60, 300, 2_000), model_1080p60(), NS);
        assert_eq!(update, PhaseUpdate::Applied { correction: 300.0 });
        assert_eq!(tracker.offset(), 300.0);
    }

    #[test]
    fn test_wrap_does_not_cost_a_revolution() {
        let mut tracker = PhaseTracker::default();
        let base = 16_666_667 * 60;
        tracker.update(&sample(base, 1120, 2_000), model_1080p60(), NS);
        assert_eq!(tracker.offset(), 1120.0);

        // Display drifts 10 lines forward, crossing zero
        let update = tracker.update(&sample(base, 5, 2_000), model_1080p60(), NS);
        assert_eq!(update, PhaseUpdate::Applied { correction: 10.0 });
        assert_eq!(tracker.offset(), 5.0);
    }

    #[test]
    fn test_slow_queries_are_rejected() {
        let mut tracker = PhaseTracker::default();
        let base = 16_666_667 * 60;
        tracker.update(&sample(base, 100, 1_000), model_1080p60(), NS);

        let update = tracker.update(&sample(base, 700, 2_500), model_1080p60(), NS);
        assert_eq!(update, PhaseUpdate::Untrusted);
        assert_eq!(tracker.offset(), 100.0);
        assert_eq!(tracker.rejected_count(), 1);

        // Just under the 2x threshold is accepted
        let update = tracker.update(&sample(base, 110, 1_999), model_1080p60(), NS);
        assert!(matches!(update, PhaseUpdate::Applied { .. }));
    }

    #[test]
    fn test_unready_model_skips_correction() {
        let mut tracker = PhaseTracker::default();
        let update = tracker.update(&sample(1_000, 500, 1_000), TimingSnapshot::default(), NS);
        assert_eq!(update, PhaseUpdate::ModelNotReady);
        assert_eq!(tracker.offset(), 0.0);
        // Query floor is still learned
        assert_eq!(tracker.min_query_ns(), Some(1_000));
    }

    #[test]
    fn test_partial_gain() {
        let mut tracker = PhaseTracker::new(2.0, 0.5);
        let base = 16_666_667 * 60;
        tracker.update(&sample(base, 200, 1_000), model_1080p60(), NS);
        assert_eq!(tracker.offset(), 100.0);
        tracker.update(&sample(base, 200, 1_000), model_1080p60(), NS);
        assert_eq!(tracker.offset(), 150.0);
    }

    #[test]
    fn test_reset() {
        let mut tracker = PhaseTracker::default();
        tracker.update(&sample(0, 42, 1_000), model_1080p60(), NS);
        tracker.reset();
        assert_eq!(tracker.offset(), 0.0);
        assert_eq!(tracker.min_query_ns(), None);
    }

    proptest! {
        #[test]
        fn prop_offset_stays_bounded(
            total in 2u32..3000,
            refresh_ns in 1_000_000u64..50_000_000,
            gain in 0.05f64..=1.0,
            samples in prop::collection::vec((0u64..u64::MAX / 4, 0u32..4000, 1u64..20_000), 1..200),
        ) {
            let model = TimingSnapshot {
                total_scanlines: total,
                active_scanlines: total / 2,
                refresh_interval_ns: refresh_ns,
            };
            let mut tracker = PhaseTracker::new(2.0, gain);
            let modulus = total as f64;

            for (t_ns, line, query_ns) in samples {
                let before = tracker.offset();
                tracker.update(&sample(t_ns, line % total, query_ns), model, NS);
                let after = tracker.offset();

                prop_assert!((0.0..modulus).contains(&after), "offset {} outside [0, {})", after, total);
                let moved = nearest_representative(wrap_scanline(after - before, modulus), modulus);
                prop_assert!(moved.abs() <= modulus / 2.0 + 1e-6);
            }
        }
    }
}
