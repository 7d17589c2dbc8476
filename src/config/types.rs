//! Configuration type definitions

use serde::{Deserialize, Serialize};

use crate::sync::PacingMode;

/// Presentation pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Pacing mode ("disabled", "simple", "scanline")
    #[serde(default)]
    pub mode: PacingMode,

    /// Frame rate for the simple limiter and the scanline fallback
    /// (0 = uncapped)
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,

    /// Present every Nth refresh; 0 disables scanline pacing
    #[serde(default = "default_divisor")]
    pub divisor: u32,

    /// Scanlines added to the vblank midpoint target (negative = earlier)
    #[serde(default)]
    pub scanline_bias: f64,

    /// How often the display timing is re-queried (0 = every cycle)
    #[serde(default = "default_model_refresh_interval_ms")]
    pub model_refresh_interval_ms: u64,

    /// Waits longer than this are treated as a stale display model and skipped
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Weight of each new present-overhead sample
    #[serde(default = "default_overhead_smoothing")]
    pub overhead_smoothing: f64,
}

fn default_target_fps() -> f64 {
    60.0
}

fn default_divisor() -> u32 {
    1
}

fn default_model_refresh_interval_ms() -> u64 {
    2000
}

fn default_max_wait_ms() -> u64 {
    1000
}

fn default_overhead_smoothing() -> f64 {
    0.01
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            mode: PacingMode::default(),
            target_fps: default_target_fps(),
            divisor: default_divisor(),
            scanline_bias: 0.0,
            model_refresh_interval_ms: default_model_refresh_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
            overhead_smoothing: default_overhead_smoothing(),
        }
    }
}

/// Scanline sampler thread configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Sleep between scan position queries
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,

    /// Queries slower than this multiple of the fastest one are discarded
    #[serde(default = "default_trusted_query_factor")]
    pub trusted_query_factor: f64,

    /// Fraction of each observed phase error applied to the offset
    #[serde(default = "default_correction_gain")]
    pub correction_gain: f64,
}

fn default_poll_interval_us() -> u64 {
    250
}

fn default_trusted_query_factor() -> f64 {
    2.0
}

fn default_correction_gain() -> f64 {
    1.0
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: default_poll_interval_us(),
            trusted_query_factor: default_trusted_query_factor(),
            correction_gain: default_correction_gain(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Collect pacing metrics
    #[serde(default = "default_metrics")]
    pub metrics: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            metrics: default_metrics(),
        }
    }
}
