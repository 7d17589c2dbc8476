//! Display binding and query errors

use thiserror::Error;

/// Result type for display operations
pub type Result<T> = std::result::Result<T, DisplayError>;

/// Errors raised by display backends.
///
/// None of these reach the caller of the pacing API as a hard failure:
/// the sampler and scheduler log them and degrade to unpaced presentation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The window handle does not resolve to any output (minimized,
    /// destroyed, or off-screen)
    #[error("Window {0:#x} is not on any display")]
    NoOutputForWindow(usize),

    /// The output disappeared between resolution and use
    #[error("Output not found: {0}")]
    OutputNotFound(String),

    /// The kernel-mode adapter interface could not be opened
    #[error("Failed to open adapter for {output}: {reason}")]
    AdapterOpenFailed {
        /// Output device name
        output: String,
        /// Backend-specific detail
        reason: String,
    },

    /// Scan position query failed (routine under topology changes)
    #[error("Scanline query failed: {0}")]
    ScanlineQueryFailed(String),

    /// Display configuration query failed
    #[error("Display configuration query failed: {0}")]
    TimingQueryFailed(String),

    /// Operation requires a bound adapter
    #[error("No adapter bound")]
    NotBound,

    /// Backend reported nonsensical timing (zero lines or zero rate)
    #[error("Invalid display timing: {0}")]
    InvalidTiming(String),
}

impl DisplayError {
    /// Whether this failure is expected to clear up on its own
    /// (retry next sample / next refresh window)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DisplayError::ScanlineQueryFailed(_)
                | DisplayError::TimingQueryFailed(_)
                | DisplayError::NoOutputForWindow(_)
        )
    }

    /// Whether the binding must be dropped and re-established
    pub fn requires_rebind(&self) -> bool {
        matches!(
            self,
            DisplayError::OutputNotFound(_) | DisplayError::NotBound | DisplayError::AdapterOpenFailed { .. }
        )
    }
}
