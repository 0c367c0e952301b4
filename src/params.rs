//! Scan parameter and status types shared by both analog drivers.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, Result};

bitflags! {
    /// Hardware scan options.
    ///
    /// Modeled on the vendor option bitmask: the default is a finite,
    /// single-shot scan; `CONTINUOUS` wraps the buffer and keeps running
    /// until explicitly stopped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ScanOptions: u32 {
        /// Transfer in driver-paced blocks rather than sample-by-sample.
        const BLOCK_IO = 1 << 1;
        /// Burst the whole buffer out of onboard memory.
        const BURST_IO = 1 << 2;
        /// Loop the buffer indefinitely until stopped.
        const CONTINUOUS = 1 << 3;
    }
}

impl ScanOptions {
    /// Whether the scan wraps its buffer and runs until stopped.
    pub fn is_continuous(self) -> bool {
        self.contains(Self::CONTINUOUS)
    }
}

/// Parameters for one analog scan (input or output side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    /// First channel of the scanned range.
    pub low_channel: u32,
    /// Last channel of the scanned range (inclusive).
    pub high_channel: u32,
    /// Requested sample rate per channel in Hz.
    pub sample_rate: f64,
    /// Buffer depth per channel in samples.
    pub samples_per_channel: usize,
    /// Scan options (finite by default).
    pub options: ScanOptions,
}

impl ScanParameters {
    /// Create finite-scan parameters over a channel range.
    pub fn new(
        low_channel: u32,
        high_channel: u32,
        sample_rate: f64,
        samples_per_channel: usize,
    ) -> Self {
        Self {
            low_channel,
            high_channel,
            sample_rate,
            samples_per_channel,
            options: ScanOptions::default(),
        }
    }

    /// Mark the scan continuous (wraparound buffer, runs until stopped).
    pub fn continuous(mut self) -> Self {
        self.options |= ScanOptions::CONTINUOUS;
        self
    }

    /// Number of channels in the scanned range.
    pub fn channel_count(&self) -> usize {
        (self.high_channel - self.low_channel + 1) as usize
    }

    /// Total interleaved buffer length in samples.
    pub fn buffer_len(&self) -> usize {
        self.samples_per_channel * self.channel_count()
    }

    /// How long one full buffer depth lasts at the requested rate.
    ///
    /// Continuous consumers must drain faster than this to avoid
    /// unrecoverable overwrite.
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_channel as f64 / self.sample_rate)
    }

    /// Validate the parameters before any hardware mutation.
    pub fn validate(&self) -> Result<()> {
        if self.low_channel > self.high_channel {
            return Err(EngineError::InvalidParameters {
                message: format!(
                    "low channel {} above high channel {}",
                    self.low_channel, self.high_channel
                ),
            });
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(EngineError::InvalidParameters {
                message: format!("sample rate must be positive, got {}", self.sample_rate),
            });
        }
        if self.samples_per_channel == 0 {
            return Err(EngineError::InvalidParameters {
                message: "samples per channel must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Lifecycle state of a scan resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    /// No scan active.
    Idle,
    /// Hardware is actively sampling or writing.
    Running,
    /// Device fault; terminal until the driver is reset.
    Error,
}

/// Snapshot of a scan resource's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStatus {
    /// Current lifecycle state.
    pub state: ScanState,
    /// Cumulative scans (per-channel samples) transferred. Monotone
    /// non-decreasing over the life of one scan.
    pub total_scans: u64,
    /// Current wraparound position within the buffer, in scans.
    pub current_index: usize,
    /// Rate the hardware actually achieved, in Hz per channel.
    pub actual_rate: f64,
}

impl ScanStatus {
    /// An idle status with zeroed counters.
    pub fn idle() -> Self {
        Self {
            state: ScanState::Idle,
            total_scans: 0,
            current_index: 0,
            actual_rate: 0.0,
        }
    }

    /// Whether the resource is mid-scan.
    pub fn is_running(&self) -> bool {
        self.state == ScanState::Running
    }
}
