//! Startup Diagnostics
//!
//! Logs the timing environment pacing depends on.

use tracing::info;

use crate::clock::Clock;
use crate::display::DisplayBackend;

/// Timing facts about the host
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEnvironment {
    /// Target operating system
    pub os: &'static str,
    /// Monotonic counter frequency
    pub ticks_per_second: u64,
    /// Kernel timer wake granularity
    pub granularity_ns: u64,
    /// Whether fine timer resolution was negotiated
    pub high_resolution: bool,
    /// Display backend name
    pub display_backend: &'static str,
}

impl TimingEnvironment {
    /// Gather timing facts
    pub fn gather(clock: &Clock, backend: &dyn DisplayBackend) -> Self {
        Self {
            os: std::env::consts::OS,
            ticks_per_second: clock.ticks_per_second(),
            granularity_ns: clock.granularity_ns(),
            high_resolution: clock.is_high_resolution(),
            display_backend: backend.backend_name(),
        }
    }

    /// Log the facts
    pub fn log(&self) {
        info!("=== Timing Environment ===");
        info!("  OS: {}", self.os);
        info!("  Counter: {} ticks/s", self.ticks_per_second);
        info!(
            "  Timer granularity: {:.3}ms (high resolution: {})",
            self.granularity_ns as f64 / 1_000_000.0,
            self.high_resolution
        );
        info!("  Display backend: {}", self.display_backend);
    }
}

/// Log startup diagnostics
pub fn log_startup_diagnostics(clock: &Clock, backend: &dyn DisplayBackend) {
    TimingEnvironment::gather(clock, backend).log();
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));
    #[cfg(debug_assertions)]
    info!("  Build: debug");
    #[cfg(not(debug_assertions))]
    info!("  Build: release");
}
