//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//!
//! ```toml
//! [pacing]
//! mode = "scanline"
//! target_fps = 60.0
//! divisor = 1
//! scanline_bias = -20.0
//!
//! [sampler]
//! poll_interval_us = 250
//!
//! [latency]
//! technology = "reflex"
//! boost_mode = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod types;

pub use types::{LoggingConfig, PacingConfig, SamplerConfig};

use crate::latency::LatencyConfig;
use crate::sync::PacingMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Presentation pacing
    #[serde(default)]
    pub pacing: PacingConfig,
    /// Scanline sampler thread
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Latency-reduction backend
    #[serde(default)]
    pub latency: LatencyConfig,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let pacing = &self.pacing;
        if !pacing.target_fps.is_finite() || pacing.target_fps < 0.0 {
            anyhow::bail!("Invalid target_fps: {} (must be >= 0)", pacing.target_fps);
        }
        if !pacing.scanline_bias.is_finite() {
            anyhow::bail!("Invalid scanline_bias: {}", pacing.scanline_bias);
        }
        if pacing.max_wait_ms == 0 {
            anyhow::bail!("max_wait_ms must be > 0");
        }
        if pacing.target_fps > 0.0 && 1_000.0 / pacing.target_fps > pacing.max_wait_ms as f64 {
            anyhow::bail!(
                "target_fps {} gives a frame interval longer than max_wait_ms ({})",
                pacing.target_fps,
                pacing.max_wait_ms
            );
        }
        if !(pacing.overhead_smoothing > 0.0 && pacing.overhead_smoothing <= 1.0) {
            anyhow::bail!(
                "overhead_smoothing must be in (0, 1], got {}",
                pacing.overhead_smoothing
            );
        }
        if pacing.mode == PacingMode::SimpleFps && pacing.target_fps == 0.0 {
            anyhow::bail!("Simple pacing mode requires target_fps > 0");
        }

        let sampler = &self.sampler;
        if sampler.poll_interval_us == 0 {
            anyhow::bail!("poll_interval_us must be > 0");
        }
        if !(sampler.trusted_query_factor >= 1.0) {
            anyhow::bail!(
                "trusted_query_factor must be >= 1.0, got {}",
                sampler.trusted_query_factor
            );
        }
        if !(sampler.correction_gain > 0.0 && sampler.correction_gain <= 1.0) {
            anyhow::bail!(
                "correction_gain must be in (0, 1], got {}",
                sampler.correction_gain
            );
        }

        let latency = &self.latency;
        if !latency.target_fps.is_finite() || latency.target_fps < 0.0 {
            anyhow::bail!("Invalid latency target_fps: {}", latency.target_fps);
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        mode: Option<PacingMode>,
        fps: Option<f64>,
        divisor: Option<u32>,
        bias: Option<f64>,
    ) -> Self {
        if let Some(mode) = mode {
            self.pacing.mode = mode;
        }
        if let Some(fps) = fps {
            self.pacing.target_fps = fps;
            self.latency.target_fps = fps;
        }
        if let Some(divisor) = divisor {
            self.pacing.divisor = divisor;
        }
        if let Some(bias) = bias {
            self.pacing.scanline_bias = bias;
        }
        self
    }
}
