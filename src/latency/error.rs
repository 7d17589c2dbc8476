//! Latency backend errors

use thiserror::Error;

/// Result type for driver-level operations
pub type Result<T> = std::result::Result<T, LatencyError>;

/// Errors raised by vendor drivers and backend setup.
///
/// Backends convert these to `false` after logging; nothing here reaches
/// the render loop as a hard failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LatencyError {
    /// The vendor SDK is not present (wrong GPU, missing runtime DLL)
    #[error("{backend} is not available: {reason}")]
    BackendUnavailable {
        /// Backend name
        backend: &'static str,
        /// Why
        reason: String,
    },

    /// The SDK loaded but rejected the device
    #[error("{backend} rejected the device: {reason}")]
    DeviceRejected {
        /// Backend name
        backend: &'static str,
        /// SDK status
        reason: String,
    },

    /// Operation requires an initialized backend
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// An SDK call failed after initialization
    #[error("{backend} {call} failed: {reason}")]
    CallFailed {
        /// Backend name
        backend: &'static str,
        /// SDK entry point
        call: &'static str,
        /// SDK status
        reason: String,
    },
}

impl LatencyError {
    /// Whether the whole technology is unusable for this session
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            LatencyError::BackendUnavailable { .. } | LatencyError::DeviceRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let unavailable = LatencyError::BackendUnavailable {
            backend: "reflex",
            reason: "no NVIDIA GPU".into(),
        };
        assert!(unavailable.is_backend_unavailable());
        assert_eq!(unavailable.to_string(), "reflex is not available: no NVIDIA GPU");

        let call = LatencyError::CallFailed {
            backend: "xell",
            call: "sleep",
            reason: "timeout".into(),
        };
        assert!(!call.is_backend_unavailable());
        assert!(!LatencyError::NotInitialized("xell").is_backend_unavailable());
    }
}
