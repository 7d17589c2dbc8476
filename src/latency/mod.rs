//! Latency-reduction backend abstraction
//!
//! Uniform marker/sleep interface over mutually incompatible vendor
//! low-latency SDKs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     LatencyManager                        │
//! │   one active backend, replaced whole on technology switch │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                  LatencyTechnology trait
//!   initialize | shutdown | apply_sleep_mode | set_marker | sleep
//!                              │
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        ▼              ▼              ▼              ▼
//!   ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌─────────┐
//!   │  None   │   │  Reflex  │   │ Anti-Lag │   │  XeLL   │
//!   └─────────┘   └──────────┘   └──────────┘   └─────────┘
//!                      │              │              │
//!                ReflexDriver   AntiLagDriver    XellDriver
//!                      └──────── DriverProvider ─────┘
//!                          (supplied by the host)
//! ```
//!
//! # Capabilities
//!
//! | Backend | Markers | Boost | Explicit sleep | Where it sleeps |
//! |---------|---------|-------|----------------|-----------------|
//! | None | - | - | - | never |
//! | Reflex | yes | yes | yes | [`LatencyTechnology::sleep`] |
//! | Anti-Lag | - | - | - | per-frame update on `SimStart` |
//! | XeLL | yes | - | yes | [`LatencyTechnology::sleep`] |
//!
//! Unsupported concepts are ignored, never reported as errors: a marker on
//! a backend without markers still advances the frame id and returns
//! `true`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod anti_lag;
mod driver;
mod error;
mod factory;
mod manager;
mod none;
mod reflex;
mod simulated;
mod stats;
mod xell;

pub use anti_lag::AntiLagBackend;
pub use driver::{AntiLagDriver, DriverProvider, NoDrivers, ReflexDriver, ReflexSleepParams, XellDriver};
pub use error::{LatencyError, Result};
pub use factory::create_backend;
pub use manager::LatencyManager;
pub use none::NoneBackend;
pub use reflex::ReflexBackend;
pub use simulated::SimulatedDrivers;
pub use stats::{FrameTimings, LatencyStats};
pub use xell::XellBackend;

/// Opaque native device or command-queue handle from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceHandle(pub usize);

/// Per-backend frame counter. Never decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct FrameId(pub u64);

impl FrameId {
    /// Advance to the next frame
    pub fn advance(&mut self) -> FrameId {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named point in the host's frame pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMarker {
    /// Simulation (game update) begins; starts a new frame
    SimStart,
    /// Simulation ends
    SimEnd,
    /// Render command submission begins
    RenderSubmitStart,
    /// Render command submission ends
    RenderSubmitEnd,
    /// Present call begins
    PresentStart,
    /// Present call returns
    PresentEnd,
    /// Input was sampled
    InputSample,
}

impl LatencyMarker {
    /// Every marker, in pipeline order
    pub const ALL: [LatencyMarker; 7] = [
        LatencyMarker::SimStart,
        LatencyMarker::SimEnd,
        LatencyMarker::RenderSubmitStart,
        LatencyMarker::RenderSubmitEnd,
        LatencyMarker::PresentStart,
        LatencyMarker::PresentEnd,
        LatencyMarker::InputSample,
    ];

    /// Position in [`LatencyMarker::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Selectable latency technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TechnologyKind {
    /// No latency reduction
    #[default]
    None,
    /// NVIDIA Reflex
    Reflex,
    /// AMD Anti-Lag 2
    AntiLag,
    /// Intel XeLL
    Xell,
}

impl TechnologyKind {
    /// Backend name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Reflex => "reflex",
            Self::AntiLag => "anti_lag",
            Self::Xell => "xell",
        }
    }
}

impl fmt::Display for TechnologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TechnologyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" | "off" => Ok(Self::None),
            "reflex" | "nvidia" => Ok(Self::Reflex),
            "anti_lag" | "antilag" | "amd" => Ok(Self::AntiLag),
            "xell" | "intel" => Ok(Self::Xell),
            _ => Err(format!("Unknown latency technology: {}", s)),
        }
    }
}

/// Latency backend settings. Replaced whole, never field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Backend to use
    #[serde(default)]
    pub technology: TechnologyKind,

    /// Enable the backend's low-latency mode
    #[serde(default = "default_true")]
    pub low_latency_mode: bool,

    /// Ask the driver to keep clocks high (Reflex only)
    #[serde(default)]
    pub boost_mode: bool,

    /// Send pipeline markers to backends that accept them
    #[serde(default = "default_true")]
    pub use_markers: bool,

    /// Frame rate cap enforced by the backend (0 = none)
    #[serde(default)]
    pub target_fps: f64,
}

fn default_true() -> bool {
    true
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            technology: TechnologyKind::None,
            low_latency_mode: true,
            boost_mode: false,
            use_markers: true,
            target_fps: 0.0,
        }
    }
}

/// Convert an fps cap to the minimum frame interval SDKs expect (0 = none)
pub fn minimum_interval_us(fps_limit: f64) -> u32 {
    if fps_limit.is_finite() && fps_limit > 0.0 {
        (1_000_000.0 / fps_limit).round() as u32
    } else {
        0
    }
}

/// What a backend can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BackendCapabilities {
    /// Accepts pipeline markers
    pub markers: bool,
    /// Has a boost (clock-keeping) mode
    pub boost: bool,
    /// Exposes an explicit sleep call
    pub explicit_sleep: bool,
    /// Can cap the frame rate itself
    pub frame_limit: bool,
}

/// Uniform interface over vendor latency SDKs.
///
/// Every method is infallible from the caller's point of view: failures
/// are logged and reported as `false`.
pub trait LatencyTechnology: Send {
    /// Which technology this is
    fn kind(&self) -> TechnologyKind;

    /// Set the backend up for `device`. Returns `true` without
    /// re-initializing if already initialized.
    fn initialize(&mut self, device: DeviceHandle) -> bool;

    /// Tear the backend down. No-op if not initialized.
    fn shutdown(&mut self);

    /// Whether [`initialize`](Self::initialize) succeeded and
    /// [`shutdown`](Self::shutdown) has not been called since
    fn is_initialized(&self) -> bool;

    /// Push a configuration snapshot. Unsupported fields are ignored.
    fn apply_sleep_mode(
        &mut self,
        low_latency: bool,
        boost: bool,
        use_markers: bool,
        fps_limit: f64,
    ) -> bool;

    /// Tag the current frame with a pipeline phase. `SimStart` advances
    /// the frame id.
    fn set_marker(&mut self, marker: LatencyMarker) -> bool;

    /// Run the backend's pacing sleep, if it has one
    fn sleep(&mut self) -> bool;

    /// Current frame id
    fn frame_id(&self) -> FrameId;

    /// What this backend supports
    fn capabilities(&self) -> BackendCapabilities;

    /// Counters
    fn stats(&self) -> LatencyStats;
}
