//! Utilities
//!
//! Operational visibility for the pacing loop.
//!
//! 1. **Metrics** - counters, gauges and windowed histograms fed from
//!    [`PacingDiagnostics`](crate::sync::PacingDiagnostics) and latency
//!    backend stats, exportable as JSON or Prometheus text
//! 2. **Diagnostics** - timing environment logged at startup
//! 3. **Error Formatting** - startup failures with troubleshooting hints
//!
//! ```rust
//! use vblank_pacer::utils::{metric_names, MetricsCollector};
//!
//! let metrics = MetricsCollector::new();
//! metrics.record_histogram(metric_names::WAIT_TIME_US, 1517.7);
//! let stats = metrics.get_histogram(metric_names::WAIT_TIME_US).unwrap();
//! assert_eq!(stats.count, 1);
//! ```

pub mod diagnostics;
pub mod errors;
pub mod metrics;

pub use diagnostics::{log_startup_diagnostics, TimingEnvironment};
pub use errors::format_user_error;
pub use metrics::{metric_names, HistogramStats, MetricsCollector, MetricsSnapshot, Timer};
