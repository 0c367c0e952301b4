//! Device capability contract consumed by the engine.
//!
//! The engine never talks to a vendor SDK directly. It requires a connected
//! device handle exposing one analog input and one analog output
//! subdevice; discovery, connection bookkeeping and handle lifecycle live
//! with the caller. Every operation returns a typed error rather than
//! panicking on hardware absence.

use std::sync::Arc;

use crate::error::Result;
use crate::params::ScanParameters;
use crate::ring::SampleRing;

/// Vendor/model/serial identification for a device handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Vendor name.
    pub vendor: String,
    /// Product/model name.
    pub model: String,
    /// Unique serial identifier.
    pub serial: String,
}

/// Raw progress report from a subdevice.
#[derive(Debug, Clone, Default)]
pub struct TransferStatus {
    /// Whether a scan is currently active.
    pub running: bool,
    /// Cumulative scans transferred since the scan started.
    pub total_scans: u64,
    /// Current wraparound position within the buffer, in scans.
    pub current_index: usize,
    /// Device-reported fault, if any.
    pub fault: Option<String>,
}

/// Hardware-paced analog input subdevice.
pub trait InputSubdevice: Send + Sync {
    /// Number of input channels the subdevice supports.
    fn channel_count(&self) -> u32;

    /// Begin a hardware-paced scan filling `ring` with interleaved scans.
    ///
    /// Returns the sample rate the hardware actually achieved. The ring is
    /// shared: the subdevice writes, the engine reads windows out.
    fn begin_scan(&self, params: &ScanParameters, ring: Arc<SampleRing>) -> Result<f64>;

    /// Non-blocking progress query. Also the pacing point for simulated
    /// hardware, which produces samples lazily when polled.
    fn poll(&self) -> Result<TransferStatus>;

    /// Cancel the active scan. No-op when idle.
    fn cancel(&self) -> Result<()>;
}

/// Hardware-paced analog output subdevice.
pub trait OutputSubdevice: Send + Sync {
    /// Number of output channels the subdevice supports.
    fn channel_count(&self) -> u32;

    /// Begin writing `buffer` (interleaved scans) at the requested rate,
    /// once or looped per `params.options`. Returns the actual rate.
    fn begin_scan(&self, params: &ScanParameters, buffer: &[f64]) -> Result<f64>;

    /// Immediately drive one channel to a voltage (software-paced write).
    fn write_value(&self, channel: u32, volts: f64) -> Result<()>;

    /// Non-blocking progress query.
    fn poll(&self) -> Result<TransferStatus>;

    /// Cancel the active scan. No-op when idle.
    fn cancel(&self) -> Result<()>;
}

/// A connected data-acquisition device handle.
///
/// Implemented by vendor integrations outside this crate and by
/// [`crate::sim::SimDevice`] for tests and development.
pub trait DaqDevice: Send + Sync {
    /// Identification of the underlying hardware.
    fn descriptor(&self) -> DeviceDescriptor;

    /// Whether the handle currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// One bounded reconnect attempt. The engine never retries beyond this.
    fn reconnect(&self) -> Result<()>;

    /// The analog input subdevice, if the hardware has one.
    fn input(&self) -> Result<Arc<dyn InputSubdevice>>;

    /// The analog output subdevice, if the hardware has one.
    fn output(&self) -> Result<Arc<dyn OutputSubdevice>>;
}
