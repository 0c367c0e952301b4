//! Analog output scan driver.
//!
//! Wraps a hardware output subdevice and serializes scan starts so that at
//! most one output scan is active per device. Supports one-shot (finite)
//! buffers, looped (continuous) buffers for sustained holds, and immediate
//! step-and-hold writes.
//!
//! Driving the output physically applies voltage to the instrument;
//! callers own the safety decision to start a scan.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::device::OutputSubdevice;
use crate::error::{EngineError, Result};
use crate::params::{ScanParameters, ScanState, ScanStatus};

/// How long `stop` waits for the hardware to confirm idle.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct OutputState {
    state: ScanState,
    actual_rate: f64,
    fault: Option<String>,
}

/// Driver for one analog output channel range.
pub struct AnalogOutputScanner {
    subdevice: Arc<dyn OutputSubdevice>,
    inner: Mutex<OutputState>,
}

impl AnalogOutputScanner {
    /// Create a driver over an output subdevice.
    pub fn new(subdevice: Arc<dyn OutputSubdevice>) -> Self {
        Self {
            subdevice,
            inner: Mutex::new(OutputState {
                state: ScanState::Idle,
                actual_rate: 0.0,
                fault: None,
            }),
        }
    }

    /// Begin writing `buffer` at the requested rate.
    ///
    /// The buffer holds interleaved scans for `params`' channel range and
    /// plays once, or loops when `params.options` is continuous. All
    /// validation happens before the hardware is touched. Fails with
    /// [`EngineError::HardwareBusy`] while a scan is active.
    pub fn scan(&self, buffer: &[f64], params: &ScanParameters) -> Result<ScanStatus> {
        params.validate()?;
        self.validate_range(params)?;
        if buffer.is_empty() || buffer.len() % params.channel_count() != 0 {
            return Err(EngineError::InvalidParameters {
                message: format!(
                    "output buffer length {} is not a positive multiple of {} channels",
                    buffer.len(),
                    params.channel_count()
                ),
            });
        }

        // The lock is held across begin_scan so concurrent starts cannot
        // interleave: exactly one caller wins, the rest see busy.
        let mut inner = self.inner.lock();
        self.sync_completion(&mut inner)?;
        match inner.state {
            ScanState::Running => {
                return Err(EngineError::HardwareBusy {
                    resource: "analog output",
                })
            }
            ScanState::Error => return Err(self.fault_error(&inner)),
            ScanState::Idle => {}
        }

        let actual_rate = self.subdevice.begin_scan(params, buffer)?;
        inner.state = ScanState::Running;
        inner.actual_rate = actual_rate;

        info!(
            low = params.low_channel,
            high = params.high_channel,
            rate = actual_rate,
            scans = buffer.len() / params.channel_count(),
            continuous = params.options.is_continuous(),
            "Started output scan"
        );
        Ok(ScanStatus {
            state: ScanState::Running,
            total_scans: 0,
            current_index: 0,
            actual_rate,
        })
    }

    /// Immediately drive channels to fixed voltages (step-and-hold writes).
    ///
    /// Fails with [`EngineError::HardwareBusy`] while a paced scan owns the
    /// subdevice; stop the scan first.
    pub fn set_levels(&self, levels: &[(u32, f64)]) -> Result<()> {
        let max = self.subdevice.channel_count();
        for &(channel, _) in levels {
            if channel >= max {
                return Err(EngineError::InvalidRange {
                    low: channel,
                    high: channel,
                    max,
                });
            }
        }

        let mut inner = self.inner.lock();
        self.sync_completion(&mut inner)?;
        if inner.state == ScanState::Running {
            return Err(EngineError::HardwareBusy {
                resource: "analog output",
            });
        }

        for &(channel, volts) in levels {
            self.subdevice.write_value(channel, volts)?;
            debug!(channel = channel, volts = volts, "Set output level");
        }
        Ok(())
    }

    /// Non-blocking progress/state query.
    pub fn status(&self) -> Result<ScanStatus> {
        let mut inner = self.inner.lock();
        let transfer = self.subdevice.poll()?;
        if let Some(message) = transfer.fault {
            self.record_fault(&mut inner, message);
        } else if inner.state == ScanState::Running && !transfer.running {
            debug!(scans = transfer.total_scans, "Output scan completed");
            inner.state = ScanState::Idle;
        }

        Ok(ScanStatus {
            state: inner.state,
            total_scans: transfer.total_scans,
            current_index: transfer.current_index,
            actual_rate: inner.actual_rate,
        })
    }

    /// Halt an active scan and block until the hardware confirms idle.
    ///
    /// Idempotent: a no-op when already idle. A sticky ERROR state is
    /// preserved across stop and cleared only by [`reset`](Self::reset).
    pub fn stop(&self) -> Result<()> {
        self.subdevice.cancel()?;

        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            let transfer = self.subdevice.poll()?;
            if let Some(message) = transfer.fault {
                self.record_fault(&mut self.inner.lock(), message);
                break;
            }
            if !transfer.running {
                break;
            }
            if Instant::now() >= deadline {
                return Err(EngineError::HardwareFault {
                    message: "output scan did not reach idle after cancel".to_string(),
                });
            }
            std::thread::sleep(Duration::from_micros(200));
        }

        let mut inner = self.inner.lock();
        if inner.state == ScanState::Running {
            info!("Stopped output scan");
            inner.state = ScanState::Idle;
        }
        Ok(())
    }

    /// Clear a sticky ERROR state after the external cause is resolved.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ScanState::Error {
            inner.state = ScanState::Idle;
            inner.fault = None;
        }
    }

    /// Last device-reported fault, if the driver is in ERROR state.
    pub fn fault(&self) -> Option<String> {
        self.inner.lock().fault.clone()
    }

    fn validate_range(&self, params: &ScanParameters) -> Result<()> {
        let max = self.subdevice.channel_count();
        if params.high_channel >= max {
            return Err(EngineError::InvalidRange {
                low: params.low_channel,
                high: params.high_channel,
                max,
            });
        }
        Ok(())
    }

    /// Fold a finished finite scan or a fault into the driver state.
    fn sync_completion(&self, inner: &mut OutputState) -> Result<()> {
        if inner.state != ScanState::Running {
            return Ok(());
        }
        let transfer = self.subdevice.poll()?;
        if let Some(message) = transfer.fault {
            self.record_fault(inner, message);
        } else if !transfer.running {
            inner.state = ScanState::Idle;
        }
        Ok(())
    }

    fn record_fault(&self, inner: &mut OutputState, message: String) {
        if inner.state != ScanState::Error {
            warn!(fault = %message, "Output driver entered ERROR state");
        }
        inner.state = ScanState::Error;
        inner.fault = Some(message);
    }

    fn fault_error(&self, inner: &OutputState) -> EngineError {
        EngineError::HardwareFault {
            message: inner
                .fault
                .clone()
                .unwrap_or_else(|| "unspecified device fault".to_string()),
        }
    }
}
