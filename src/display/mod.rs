//! Display and adapter binding
//!
//! Resolves the tracked window to the output currently showing it and keeps
//! a handle to that output's kernel-mode query interface.
//!
//! # Binding State Machine
//!
//! ```text
//!            bind(window) ok              name differs
//!  Unbound ───────────────────► Bound(name) ─────────────► close + reopen
//!     ▲                             │
//!     └──── resolve fails / unbind ─┘
//! ```
//!
//! Rebinding is decided by comparing output *names*, never handles: after a
//! mode change the old handle can still look valid while pointing at a
//! stale adapter.
//!
//! # Backends
//!
//! | Backend | Platform | Purpose |
//! |---------|----------|---------|
//! | [`SimulatedDisplay`] | all | tests, demos, platforms without scanline queries |
//! | `WindowsDisplay` | Windows | D3DKMT scanline queries + `QueryDisplayConfig` |

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace};

mod error;
mod model;
mod simulated;

#[cfg(windows)]
mod win32;

pub use error::{DisplayError, Result};
pub use model::{DisplayTimingModel, PacingContext, TimingSnapshot};
pub use simulated::SimulatedDisplay;

#[cfg(windows)]
pub use win32::WindowsDisplay;

/// Opaque native window handle supplied by the host
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub usize);

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowHandle({:#x})", self.0)
    }
}

/// Rational vertical refresh rate (`numerator / denominator` Hz)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRate {
    /// Numerator
    pub numerator: u32,
    /// Denominator
    pub denominator: u32,
}

impl RefreshRate {
    /// Create a refresh rate; use `(60000, 1001)` style values for NTSC rates.
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Refresh period in nanoseconds, rounded to nearest. Zero if invalid.
    pub fn interval_ns(&self) -> u64 {
        if self.numerator == 0 || self.denominator == 0 {
            return 0;
        }
        let num = self.numerator as u128;
        let wide = (self.denominator as u128 * 1_000_000_000 + num / 2) / num;
        wide as u64
    }

    /// Rate in Hz
    pub fn hz(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }
}

/// Raw timing of one output as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTiming {
    /// Total scanlines per refresh including vertical blank
    pub total_scanlines: u32,
    /// Visible scanlines
    pub active_scanlines: u32,
    /// Vertical refresh rate
    pub refresh: RefreshRate,
}

impl DisplayTiming {
    /// Reject zero or inverted values
    pub fn validate(&self) -> Result<()> {
        if self.total_scanlines == 0 || self.refresh.interval_ns() == 0 {
            return Err(DisplayError::InvalidTiming(format!(
                "total={} refresh={}/{}",
                self.total_scanlines, self.refresh.numerator, self.refresh.denominator
            )));
        }
        if self.active_scanlines > self.total_scanlines {
            return Err(DisplayError::InvalidTiming(format!(
                "active {} exceeds total {}",
                self.active_scanlines, self.total_scanlines
            )));
        }
        Ok(())
    }
}

/// An output (monitor) a window can be on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Stable device name, e.g. `\\.\DISPLAY1`
    pub name: String,
    /// Backend-specific monitor handle; unstable across mode changes
    pub native_handle: usize,
}

/// Opaque kernel-mode adapter handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterHandle(pub u32);

/// Capability handle to one output's scan-position interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterBinding {
    /// Adapter the output is driven by
    pub adapter: AdapterHandle,
    /// Video present source on that adapter
    pub source_id: u32,
    /// Name of the output this binding was opened for
    pub output_name: String,
}

/// Instantaneous scan position of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPosition {
    /// Current scanline
    pub scanline: u32,
    /// Whether the controller reports vertical blank
    pub in_vblank: bool,
}

/// OS seam for display queries.
///
/// Implementations must be callable from the sampler thread and the
/// present thread concurrently; each binding is only used by one thread.
pub trait DisplayBackend: Send + Sync {
    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Find the output currently showing `window`
    fn resolve_output(&self, window: WindowHandle) -> Result<OutputDescriptor>;

    /// Open the kernel-mode query interface for `output`
    fn open_adapter(&self, output: &OutputDescriptor) -> Result<AdapterBinding>;

    /// Release a binding returned by [`open_adapter`](Self::open_adapter)
    fn close_adapter(&self, binding: &AdapterBinding);

    /// Query the live scan position
    fn scan_position(&self, binding: &AdapterBinding) -> Result<ScanPosition>;

    /// Query the output's timing
    fn query_timing(&self, output: &OutputDescriptor) -> Result<DisplayTiming>;
}

/// Result of a [`DisplayBinder::bind_checked`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// Already bound to the window's output
    Unchanged,
    /// Bound to a different output than before (or bound for the first time)
    Rebound,
    /// No output could be resolved or opened; now unbound
    Failed,
}

impl BindOutcome {
    /// Whether a binding is live after the call
    pub fn is_bound(&self) -> bool {
        !matches!(self, BindOutcome::Failed)
    }
}

enum BindingState {
    Unbound,
    Bound {
        output: OutputDescriptor,
        binding: AdapterBinding,
    },
}

/// Owns at most one live [`AdapterBinding`].
///
/// Never shared between threads; the sampler thread and the scheduler each
/// own their own binder over the same backend.
pub struct DisplayBinder {
    backend: Arc<dyn DisplayBackend>,
    state: BindingState,
}

impl DisplayBinder {
    /// Create an unbound binder
    pub fn new(backend: Arc<dyn DisplayBackend>) -> Self {
        Self {
            backend,
            state: BindingState::Unbound,
        }
    }

    /// Bind to the output showing `window`. Returns `false` if no output
    /// could be resolved; callers retry later.
    pub fn bind(&mut self, window: WindowHandle) -> bool {
        self.bind_checked(window).is_bound()
    }

    /// Bind to the output showing `window`, reporting whether the output
    /// changed.
    pub fn bind_checked(&mut self, window: WindowHandle) -> BindOutcome {
        let output = match self.backend.resolve_output(window) {
            Ok(output) => output,
            Err(e) => {
                trace!("Display resolution failed: {}", e);
                self.unbind();
                return BindOutcome::Failed;
            }
        };

        if let BindingState::Bound { output: current, .. } = &self.state {
            if current.name == output.name {
                return BindOutcome::Unchanged;
            }
            info!("Window moved from {} to {}, rebinding", current.name, output.name);
        }

        self.unbind();

        match self.backend.open_adapter(&output) {
            Ok(binding) => {
                debug!(
                    "Bound {} (adapter {:?}, source {}) via {}",
                    output.name,
                    binding.adapter,
                    binding.source_id,
                    self.backend.backend_name()
                );
                self.state = BindingState::Bound { output, binding };
                BindOutcome::Rebound
            }
            Err(e) => {
                debug!("Adapter open failed: {}", e);
                BindOutcome::Failed
            }
        }
    }

    /// Close the binding if one is live
    pub fn unbind(&mut self) {
        if let BindingState::Bound { binding, .. } =
            std::mem::replace(&mut self.state, BindingState::Unbound)
        {
            self.backend.close_adapter(&binding);
        }
    }

    /// Whether a binding is live
    pub fn is_bound(&self) -> bool {
        matches!(self.state, BindingState::Bound { .. })
    }

    /// Live binding, if any
    pub fn binding(&self) -> Option<&AdapterBinding> {
        match &self.state {
            BindingState::Bound { binding, .. } => Some(binding),
            BindingState::Unbound => None,
        }
    }

    /// Bound output, if any
    pub fn output(&self) -> Option<&OutputDescriptor> {
        match &self.state {
            BindingState::Bound { output, .. } => Some(output),
            BindingState::Unbound => None,
        }
    }

    /// Name of the bound output
    pub fn bound_name(&self) -> Option<&str> {
        self.output().map(|o| o.name.as_str())
    }

    /// Query the bound output's scan position
    pub fn scan_position(&self) -> Result<ScanPosition> {
        let binding = self.binding().ok_or(DisplayError::NotBound)?;
        self.backend.scan_position(binding)
    }

    /// Query the bound output's timing
    pub fn query_timing(&self) -> Result<DisplayTiming> {
        let output = self.output().ok_or(DisplayError::NotBound)?;
        let timing = self.backend.query_timing(output)?;
        timing.validate()?;
        Ok(timing)
    }

    /// Backend this binder talks to
    pub fn backend(&self) -> &Arc<dyn DisplayBackend> {
        &self.backend
    }
}

impl Drop for DisplayBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl fmt::Debug for DisplayBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayBinder")
            .field("backend", &self.backend.backend_name())
            .field("bound", &self.bound_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;

    fn timing_1080p60() -> DisplayTiming {
        DisplayTiming {
            total_scanlines: 1125,
            active_scanlines: 1080,
            refresh: RefreshRate::new(60, 1),
        }
    }

    #[test]
    fn test_refresh_interval_rounding() {
        assert_eq!(RefreshRate::new(60, 1).interval_ns(), 16_666_667);
        assert_eq!(RefreshRate::new(60000, 1001).interval_ns(), 16_683_333);
        assert_eq!(RefreshRate::new(144, 1).interval_ns(), 6_944_444);
        assert_eq!(RefreshRate::new(0, 1).interval_ns(), 0);
        assert_eq!(RefreshRate::new(60, 0).interval_ns(), 0);
    }

    #[test]
    fn test_timing_validation() {
        assert!(timing_1080p60().validate().is_ok());

        let mut bad = timing_1080p60();
        bad.total_scanlines = 0;
        assert!(bad.validate().is_err());

        let mut inverted = timing_1080p60();
        inverted.active_scanlines = 2000;
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_bind_and_rebind_by_name() {
        let display = Arc::new(SimulatedDisplay::new(Clock::global()));
        display.add_output("\\\\.\\DISPLAY1", timing_1080p60());
        display.add_output("\\\\.\\DISPLAY2", timing_1080p60());
        let window = WindowHandle(0x10);
        display.attach_window(window, "\\\\.\\DISPLAY1");

        let mut binder = DisplayBinder::new(display.clone());
        assert_eq!(binder.bind_checked(window), BindOutcome::Rebound);
        assert_eq!(binder.bound_name(), Some("\\\\.\\DISPLAY1"));
        assert_eq!(display.open_adapter_count(), 1);

        // Same output: no churn
        assert_eq!(binder.bind_checked(window), BindOutcome::Unchanged);
        assert_eq!(display.open_adapter_count(), 1);

        // Window moved: old adapter closed before the new one opens
        display.attach_window(window, "\\\\.\\DISPLAY2");
        assert_eq!(binder.bind_checked(window), BindOutcome::Rebound);
        assert_eq!(binder.bound_name(), Some("\\\\.\\DISPLAY2"));
        assert_eq!(display.open_adapter_count(), 1);
    }

    #[test]
    fn test_bind_failure_leaves_unbound() {
        let display = Arc::new(SimulatedDisplay::new(Clock::global()));
        display.add_output("\\\\.\\DISPLAY1", timing_1080p60());
        let window = WindowHandle(0x20);
        display.attach_window(window, "\\\\.\\DISPLAY1");

        let mut binder = DisplayBinder::new(display.clone());
        assert!(binder.bind(window));

        display.detach_window(window);
        assert!(!binder.bind(window));
        assert!(!binder.is_bound());
        assert_eq!(display.open_adapter_count(), 0);
        assert_eq!(binder.scan_position(), Err(DisplayError::NotBound));
    }

    #[test]
    fn test_drop_closes_adapter() {
        let display = Arc::new(SimulatedDisplay::new(Clock::global()));
        display.add_output("\\\\.\\DISPLAY1", timing_1080p60());
        let window = WindowHandle(0x30);
        display.attach_window(window, "\\\\.\\DISPLAY1");

        {
            let mut binder = DisplayBinder::new(display.clone());
            assert!(binder.bind(window));
            assert_eq!(display.open_adapter_count(), 1);
        }
        assert_eq!(display.open_adapter_count(), 0);
    }

    #[test]
    fn test_query_timing_through_binder() {
        let display = Arc::new(SimulatedDisplay::new(Clock::global()));
        display.add_output("\\\\.\\DISPLAY1", timing_1080p60());
        let window = WindowHandle(0x40);
        display.attach_window(window, "\\\\.\\DISPLAY1");

        let mut binder = DisplayBinder::new(display);
        assert_eq!(binder.query_timing(), Err(DisplayError::NotBound));
        assert!(binder.bind(window));
        assert_eq!(binder.query_timing(), Ok(timing_1080p60()));
    }
}
