//! Error types for the acquisition engine.
//!
//! Every failure the engine can report is a distinguishable, inspectable
//! value. Validation errors are raised before any hardware mutation;
//! hardware faults propagate upward unchanged and leave the affected
//! driver in the ERROR state until it is explicitly reset.

use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a circular-buffer window could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderrunKind {
    /// The hardware has not yet written the end of the requested window.
    NotYetSampled,
    /// The start of the requested window is older than one buffer depth
    /// and has been overwritten by the ring.
    Overwritten,
}

impl fmt::Display for UnderrunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotYetSampled => write!(f, "not yet sampled"),
            Self::Overwritten => write!(f, "overwritten by ring wraparound"),
        }
    }
}

/// Errors that can occur when driving the acquisition engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested scan resource is already running a scan.
    #[error("{resource} is busy: a scan is already active")]
    HardwareBusy {
        /// Which physical resource was busy ("analog input" / "analog output").
        resource: &'static str,
    },

    /// Channel range falls outside what the subdevice supports.
    #[error("invalid channel range {low}..={high}: subdevice has {max} channels")]
    InvalidRange {
        /// First channel of the requested range.
        low: u32,
        /// Last channel of the requested range.
        high: u32,
        /// Number of channels the subdevice actually has.
        max: u32,
    },

    /// Malformed scan parameters (rate, depth, channel ordering).
    #[error("invalid scan parameters: {message}")]
    InvalidParameters {
        /// What was wrong with the parameters.
        message: String,
    },

    /// Malformed experiment profile.
    #[error("invalid profile: {message}")]
    InvalidProfile {
        /// What was wrong with the profile.
        message: String,
    },

    /// Profile has no points at all.
    #[error("profile has no points")]
    EmptyProfile,

    /// Per-channel profiles do not line up with the output channel range.
    #[error("channel mismatch: {message}")]
    ChannelMismatch {
        /// Which channels or lengths disagreed.
        message: String,
    },

    /// Calibration table is unusable for interpolation.
    #[error("invalid calibration: {message}")]
    InvalidCalibration {
        /// Why the table was rejected.
        message: String,
    },

    /// A circular-buffer window could not be served.
    #[error("buffer underrun: {scans} scan(s) at scan {start_scan} ({kind})")]
    BufferUnderrun {
        /// First requested scan (per-channel sample index).
        start_scan: u64,
        /// Number of requested scans.
        scans: usize,
        /// Whether the window was missing ahead of or behind the ring.
        kind: UnderrunKind,
    },

    /// A sequence operation was called before `arm`.
    #[error("sequence is not armed")]
    NotArmed,

    /// `arm` was called twice without a reset.
    #[error("sequence is already armed; reset before re-arming")]
    AlreadyArmed,

    /// The sequence is running and cannot be re-armed.
    #[error("sequence is running")]
    Busy,

    /// Device-reported error. Terminal for the affected driver until reset.
    #[error("hardware fault: {message}")]
    HardwareFault {
        /// Fault text reported by the device.
        message: String,
    },

    /// The device handle has no subdevice of the requested kind.
    #[error("device '{device}' does not support {subdevice}")]
    NotSupported {
        /// Device model or identifier.
        device: String,
        /// The missing capability.
        subdevice: &'static str,
    },

    /// The device handle is not connected.
    #[error("device '{device}' is not connected")]
    NotConnected {
        /// Device model or identifier.
        device: String,
    },
}

impl EngineError {
    /// Whether the caller should retry after a short wait.
    ///
    /// Only timing races qualify; validation and sequencing errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BufferUnderrun {
                kind: UnderrunKind::NotYetSampled,
                ..
            }
        )
    }

    /// Whether this error indicates the resource was mid-scan.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::HardwareBusy { .. } | Self::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_channel_bounds() {
        let err = EngineError::InvalidRange {
            low: 0,
            high: 9,
            max: 8,
        };
        let text = err.to_string();
        assert!(text.contains('9'));
        assert!(text.contains('8'));
    }

    #[test]
    fn only_not_yet_sampled_is_retryable() {
        let waiting = EngineError::BufferUnderrun {
            start_scan: 0,
            scans: 10,
            kind: UnderrunKind::NotYetSampled,
        };
        let lost = EngineError::BufferUnderrun {
            start_scan: 0,
            scans: 10,
            kind: UnderrunKind::Overwritten,
        };
        assert!(waiting.is_retryable());
        assert!(!lost.is_retryable());
        assert!(!EngineError::NotArmed.is_retryable());
    }
}
