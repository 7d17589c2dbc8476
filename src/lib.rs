//! # vblank-pacer
//!
//! Frame presentation pacing for real-time renderers.
//!
//! Presents are delayed until the display's scan-out beam reaches a target
//! scanline, normally the middle of the vertical blanking interval, so
//! frames land on a consistent refresh boundary without a driver vsync
//! queue. Vendor low-latency SDKs are reached through one uniform backend
//! interface.
//!
//! # Architecture
//!
//! ```text
//! vblank-pacer
//!   ├─> Clock (monotonic counter, hybrid kernel-timer + yield waits)
//!   ├─> Display (output binding, scan position, timing model)
//!   ├─> Sync
//!   │     ├─> Sampler thread (scan samples → phase correction)
//!   │     ├─> LatentSyncLimiter (scanline-targeted waits)
//!   │     ├─> SimpleFrameLimiter (fixed fps cap, fallback)
//!   │     └─> FramePacer (host entry point)
//!   └─> Latency (None | Reflex | Anti-Lag | XeLL behind one trait)
//! ```
//!
//! # Data Flow
//!
//! **Sampler:** Display → ScanSample → PhaseTracker → PacingContext
//!
//! **Present thread:** PacingContext → WaitPlan → Clock::wait_until → Present
//!
//! **Latency:** host markers → LatencyManager → vendor driver

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Monotonic clock and high resolution waits
pub mod clock;

/// Configuration
pub mod config;

/// Display binding and scan position queries
///
/// The [`DisplayBackend`](display::DisplayBackend) trait hides the OS: a
/// Windows kernel-mode implementation and a clock-driven simulated display
/// used on every other platform and in tests.
pub mod display;

/// Vendor latency-reduction backends
pub mod latency;

/// Frame pacing
///
/// Scanline sampling, phase correction and the limiters that turn a
/// timing model into waits.
pub mod sync;

/// Metrics, diagnostics and error formatting
pub mod utils;

pub use clock::{Clock, ClockSample, TickDuration, WaitTimer};
pub use config::Config;
pub use display::{DisplayBackend, PacingContext, SimulatedDisplay, WindowHandle};
pub use latency::{LatencyManager, LatencyMarker, TechnologyKind};
pub use sync::{FramePacer, PacingMode};
