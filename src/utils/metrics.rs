//! Pacing Metrics
//!
//! Counters, gauges and windowed histograms for the pacing loop:
//! - Wait times and achieved frame intervals
//! - Scanline limiter and sampler counters
//! - Phase correction and present overhead
//! - Latency backend activity
//!
//! Metrics can be exported as JSON or Prometheus text for overlays and
//! external monitoring.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

use crate::clock::{Clock, ClockSample};
use crate::latency::LatencyStats;
use crate::sync::PacingDiagnostics;

/// Observations kept per histogram for percentile estimates
pub const DEFAULT_HISTOGRAM_WINDOW: usize = 4096;

/// Metrics collector for a pacing session
pub struct MetricsCollector {
    counters: RwLock<BTreeMap<String, u64>>,
    gauges: RwLock<BTreeMap<String, f64>>,
    histograms: RwLock<BTreeMap<String, Histogram>>,
    histogram_window: usize,
    start_time: Instant,
}

impl MetricsCollector {
    /// Create a collector with the default histogram window
    pub fn new() -> Self {
        Self::with_histogram_window(DEFAULT_HISTOGRAM_WINDOW)
    }

    /// Create a collector keeping `window` observations per histogram
    pub fn with_histogram_window(window: usize) -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            histogram_window: window.max(1),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter by `value`
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Overwrite a counter with an absolute value read from elsewhere
    pub fn set_counter(&self, name: &str, value: u64) {
        self.counters.write().insert(name.to_string(), value);
    }

    /// Set a gauge value
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    /// Record a histogram observation
    pub fn record_histogram(&self, name: &str, value: f64) {
        let window = self.histogram_window;
        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(window))
            .record(value);
    }

    /// Get a counter value
    pub fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).copied()
    }

    /// Get a gauge value
    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).copied()
    }

    /// Get histogram statistics
    pub fn get_histogram(&self, name: &str) -> Option<HistogramStats> {
        self.histograms.read().get(name).map(|h| h.stats())
    }

    /// Copy the scanline pacer's state into gauges and counters
    pub fn record_pacing(&self, diag: &PacingDiagnostics) {
        use metric_names::*;

        self.set_gauge(PHASE_OFFSET_SCANLINES, diag.phase_offset);
        self.set_gauge(SELF_OVERHEAD_US, diag.self_overhead_ns / 1_000.0);
        self.set_gauge(SCANLINE_BIAS, diag.scanline_bias);
        self.set_gauge(REFRESH_INTERVAL_US, diag.refresh_interval_ns as f64 / 1_000.0);
        if let Some(min_query_ns) = diag.min_query_ns {
            self.set_gauge(MIN_SCAN_QUERY_US, min_query_ns as f64 / 1_000.0);
        }

        self.set_counter(FRAMES_PACED, diag.limiter.paced_cycles);
        self.set_counter(FRAMES_UNPACED, diag.limiter.skipped_cycles);
        self.set_counter(IMPLAUSIBLE_WAITS, diag.limiter.implausible_waits);
        self.set_counter(MODEL_REFRESHES, diag.limiter.model_refreshes);
        self.set_counter(REBINDS, diag.limiter.rebinds);
        self.set_counter(FALLBACK_FRAMES, diag.fallback_frames);

        if let Some(sampler) = &diag.sampler {
            self.set_counter(SCAN_SAMPLES, sampler.samples);
            self.set_counter(SCAN_SAMPLE_FAILURES, sampler.failures);
            self.set_counter(SCAN_SAMPLES_REJECTED, sampler.rejected);
        }
    }

    /// Copy latency backend counters
    pub fn record_latency(&self, stats: &LatencyStats) {
        use metric_names::*;

        self.set_counter(LATENCY_MARKERS_SENT, stats.markers_sent);
        self.set_counter(LATENCY_MARKERS_IGNORED, stats.markers_ignored);
        self.set_counter(LATENCY_SLEEPS, stats.sleeps);
        self.set_counter(LATENCY_FAILURES, stats.failures);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: SystemTime::now(),
            uptime: self.start_time.elapsed(),
            counters: self.counters.read().clone(),
            gauges: self.gauges.read().clone(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.stats()))
                .collect(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.counters.write().clear();
        self.gauges.write().clear();
        self.histograms.write().clear();
    }

    /// Export metrics in Prometheus text format, names in sorted order
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in self.counters.read().iter() {
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        for (name, value) in self.gauges.read().iter() {
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        // Windowed quantiles, so exported as a summary
        for (name, histogram) in self.histograms.read().iter() {
            let stats = histogram.stats();
            output.push_str(&format!("# TYPE {} summary\n", name));
            output.push_str(&format!("{}{{quantile=\"0.5\"}} {}\n", name, stats.p50));
            output.push_str(&format!("{}{{quantile=\"0.95\"}} {}\n", name, stats.p95));
            output.push_str(&format!("{}{{quantile=\"0.99\"}} {}\n", name, stats.p99));
            output.push_str(&format!("{}_sum {}\n", name, stats.sum));
            output.push_str(&format!("{}_count {}\n", name, stats.count));
        }

        output
    }

    /// Export metrics as JSON
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Value distribution over a sliding window.
///
/// Count, sum, min and max cover every observation; mean, stddev and
/// percentiles cover only the window.
pub struct Histogram {
    window: VecDeque<f64>,
    capacity: usize,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Histogram {
    fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.min(DEFAULT_HISTOGRAM_WINDOW)),
            capacity,
            count: 0,
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
        }
    }

    fn record(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    fn stats(&self) -> HistogramStats {
        if self.window.is_empty() {
            return HistogramStats::default();
        }

        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;

        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        HistogramStats {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean,
            stddev: variance.sqrt(),
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Lower-interpolation percentile of sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let index = ((sorted_values.len() - 1) as f64 * p) as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}

/// Histogram statistics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistogramStats {
    /// Total number of observations
    pub count: u64,
    /// Sum of all observations
    pub sum: f64,
    /// Minimum observed value
    pub min: f64,
    /// Maximum observed value
    pub max: f64,
    /// Mean over the window
    pub mean: f64,
    /// Standard deviation over the window
    pub stddev: f64,
    /// Median over the window
    pub p50: f64,
    /// 95th percentile over the window
    pub p95: f64,
    /// 99th percentile over the window
    pub p99: f64,
}

/// Point-in-time snapshot of all collected metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When this snapshot was taken
    pub timestamp: SystemTime,
    /// Time since the collector was created
    pub uptime: Duration,
    /// Counter values
    pub counters: BTreeMap<String, u64>,
    /// Gauge values
    pub gauges: BTreeMap<String, f64>,
    /// Histogram statistics
    pub histograms: BTreeMap<String, HistogramStats>,
}

pub mod metric_names {
    //! Metric names shared by the pacer, the CLI and exporters.

    /// Frames that went through the pacer
    pub const FRAMES_TOTAL: &str = "frames_total";
    /// Frames paced to a scanline target
    pub const FRAMES_PACED: &str = "scanline_frames_paced_total";
    /// Scanline cycles that did not wait
    pub const FRAMES_UNPACED: &str = "scanline_frames_unpaced_total";
    /// Frames paced by the fps cap because scanline pacing was unavailable
    pub const FALLBACK_FRAMES: &str = "fallback_frames_total";
    /// Computed waits rejected as implausible
    pub const IMPLAUSIBLE_WAITS: &str = "implausible_waits_total";
    /// Display timing model refreshes
    pub const MODEL_REFRESHES: &str = "model_refreshes_total";
    /// Display rebinds
    pub const REBINDS: &str = "display_rebinds_total";

    /// Time spent waiting in the pacer (microseconds)
    pub const WAIT_TIME_US: &str = "pacer_wait_time_us";
    /// Present-to-present interval (microseconds)
    pub const FRAME_INTERVAL_US: &str = "frame_interval_us";
    /// Present call duration (microseconds)
    pub const PRESENT_TIME_US: &str = "present_time_us";

    /// Phase correction applied to the timing model (scanlines)
    pub const PHASE_OFFSET_SCANLINES: &str = "phase_offset_scanlines";
    /// Smoothed present overhead (microseconds)
    pub const SELF_OVERHEAD_US: &str = "self_overhead_us";
    /// Configured scanline bias
    pub const SCANLINE_BIAS: &str = "scanline_bias";
    /// Refresh period of the timing model (microseconds)
    pub const REFRESH_INTERVAL_US: &str = "refresh_interval_us";
    /// Fastest scan query seen (microseconds)
    pub const MIN_SCAN_QUERY_US: &str = "min_scan_query_us";

    /// Scan position samples taken
    pub const SCAN_SAMPLES: &str = "scan_samples_total";
    /// Scan position queries that failed
    pub const SCAN_SAMPLE_FAILURES: &str = "scan_sample_failures_total";
    /// Scan samples rejected as untrusted
    pub const SCAN_SAMPLES_REJECTED: &str = "scan_samples_rejected_total";

    /// Markers forwarded to the latency driver
    pub const LATENCY_MARKERS_SENT: &str = "latency_markers_sent_total";
    /// Markers the latency backend ignored
    pub const LATENCY_MARKERS_IGNORED: &str = "latency_markers_ignored_total";
    /// Latency backend sleeps
    pub const LATENCY_SLEEPS: &str = "latency_sleeps_total";
    /// Failed latency driver calls
    pub const LATENCY_FAILURES: &str = "latency_failures_total";
}

/// Measures a span on the pacing clock
pub struct Timer {
    clock: &'static Clock,
    start: ClockSample,
}

impl Timer {
    /// Start timing on the global clock
    pub fn new() -> Self {
        Self::on(Clock::global())
    }

    /// Start timing on `clock`
    pub fn on(clock: &'static Clock) -> Self {
        Self {
            clock,
            start: clock.now(),
        }
    }

    /// Elapsed nanoseconds
    pub fn elapsed_ns(&self) -> u64 {
        (self.clock.now() - self.start).to_nanos(self.clock.ticks_per_second())
    }

    /// Elapsed microseconds
    pub fn elapsed_us(&self) -> f64 {
        self.elapsed_ns() as f64 / 1_000.0
    }

    /// Elapsed milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ns() as f64 / 1_000_000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let metrics = MetricsCollector::new();

        metrics.increment_counter(metric_names::FRAMES_TOTAL, 1);
        metrics.increment_counter(metric_names::FRAMES_TOTAL, 5);
        assert_eq!(metrics.get_counter(metric_names::FRAMES_TOTAL), Some(6));

        metrics.set_counter(metric_names::FRAMES_TOTAL, 2);
        assert_eq!(metrics.get_counter(metric_names::FRAMES_TOTAL), Some(2));
    }

    #[test]
    fn test_gauge() {
        let metrics = MetricsCollector::new();

        metrics.set_gauge("phase", 1.5);
        metrics.set_gauge("phase", -3.0);
        assert_eq!(metrics.get_gauge("phase"), Some(-3.0));
    }

    #[test]
    fn test_histogram_window() {
        let metrics = MetricsCollector::with_histogram_window(4);

        for v in [100.0, 1.0, 2.0, 3.0, 4.0] {
            metrics.record_histogram("wait", v);
        }

        let stats = metrics.get_histogram("wait").unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.sum, 110.0);
        // The 100.0 outlier has left the window
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.p99, 3.0);
    }

    #[test]
    fn test_histogram_with_nan_does_not_panic() {
        let metrics = MetricsCollector::new();
        metrics.record_histogram("wait", 1.0);
        metrics.record_histogram("wait", f64::NAN);
        assert_eq!(metrics.get_histogram("wait").unwrap().count, 2);
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsCollector::new();

        metrics.increment_counter("test", 1);
        metrics.set_gauge("test", 1.0);
        metrics.record_histogram("test", 1.0);
        metrics.reset();

        assert_eq!(metrics.get_counter("test"), None);
        assert_eq!(metrics.get_gauge("test"), None);
        assert_eq!(metrics.get_histogram("test"), None);
    }

    #[test]
    fn test_latency_counters() {
        let metrics = MetricsCollector::new();
        let mut stats = LatencyStats::new("reflex");
        stats.markers_sent = 12;
        stats.sleeps = 2;

        metrics.record_latency(&stats);
        assert_eq!(metrics.get_counter(metric_names::LATENCY_MARKERS_SENT), Some(12));
        assert_eq!(metrics.get_counter(metric_names::LATENCY_SLEEPS), Some(2));
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsCollector::new();

        metrics.increment_counter("b_total", 42);
        metrics.increment_counter("a_total", 1);
        metrics.set_gauge("phase", 0.25);
        metrics.record_histogram("wait_us", 10.0);

        let output = metrics.export_prometheus();
        assert!(output.contains("b_total 42"));
        assert!(output.contains("phase 0.25"));
        assert!(output.contains("wait_us{quantile=\"0.5\"} 10"));
        assert!(output.contains("wait_us_count 1"));
        assert!(output.find("a_total").unwrap() < output.find("b_total").unwrap());
    }

    #[test]
    fn test_json_export() {
        let metrics = MetricsCollector::new();

        metrics.increment_counter("frames_total", 1);
        let json = metrics.export_json().unwrap();
        assert!(json.contains("\"frames_total\""));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(Duration::from_millis(10));

        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 9.9);
        assert!(elapsed < 500.0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];

        assert_eq!(percentile(&values, 0.50), 5.0);
        assert_eq!(percentile(&values, 0.95), 9.0);
        assert_eq!(percentile(&values, 0.99), 9.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
