//! Analog input scan driver with circular-buffer semantics.
//!
//! Programs continuous (wraparound) or finite input scans into a shared
//! [`SampleRing`] and exposes windowed reads that unwrap the circular
//! layout; callers address whole scans by absolute index and never reason
//! about wraparound. In continuous mode the last full buffer depth of data
//! is always retrievable; anything older is overwritten by design.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::device::InputSubdevice;
use crate::error::{EngineError, Result};
use crate::params::{ScanParameters, ScanState, ScanStatus};
use crate::ring::SampleRing;

/// How long `stop` waits for the hardware to confirm idle.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct InputState {
    state: ScanState,
    actual_rate: f64,
    fault: Option<String>,
    ring: Option<Arc<SampleRing>>,
    params: Option<ScanParameters>,
}

/// Driver for one analog input channel range plus its circular buffer.
pub struct AnalogInputScanner {
    subdevice: Arc<dyn InputSubdevice>,
    inner: Mutex<InputState>,
}

impl AnalogInputScanner {
    /// Create a driver over an input subdevice.
    pub fn new(subdevice: Arc<dyn InputSubdevice>) -> Self {
        Self {
            subdevice,
            inner: Mutex::new(InputState {
                state: ScanState::Idle,
                actual_rate: 0.0,
                fault: None,
                ring: None,
                params: None,
            }),
        }
    }

    /// Allocate the circular buffer and begin sampling.
    ///
    /// Finite scans stop on their own after `samples_per_channel` scans;
    /// continuous scans wrap the ring and run until [`stop`](Self::stop).
    /// Fails with [`EngineError::HardwareBusy`] while a scan is active and
    /// [`EngineError::InvalidRange`] for channels the subdevice lacks,
    /// before any hardware mutation.
    pub fn scan(&self, params: ScanParameters) -> Result<ScanStatus> {
        params.validate()?;
        let max = self.subdevice.channel_count();
        if params.high_channel >= max {
            return Err(EngineError::InvalidRange {
                low: params.low_channel,
                high: params.high_channel,
                max,
            });
        }

        // Lock held across begin_scan: concurrent starts race on this
        // lock and exactly one wins.
        let mut inner = self.inner.lock();
        self.sync_completion(&mut inner)?;
        match inner.state {
            ScanState::Running => {
                return Err(EngineError::HardwareBusy {
                    resource: "analog input",
                })
            }
            ScanState::Error => return Err(self.fault_error(&inner)),
            ScanState::Idle => {}
        }

        let ring = Arc::new(SampleRing::new(
            params.samples_per_channel,
            params.channel_count(),
        ));
        let actual_rate = self.subdevice.begin_scan(&params, Arc::clone(&ring))?;

        info!(
            low = params.low_channel,
            high = params.high_channel,
            rate = actual_rate,
            depth = params.samples_per_channel,
            continuous = params.options.is_continuous(),
            "Started input scan"
        );
        inner.state = ScanState::Running;
        inner.actual_rate = actual_rate;
        inner.ring = Some(ring);
        inner.params = Some(params);

        Ok(ScanStatus {
            state: ScanState::Running,
            total_scans: 0,
            current_index: 0,
            actual_rate,
        })
    }

    /// Copy out `scans` scans starting at absolute scan `start_scan`.
    ///
    /// The returned samples are interleaved across the scanned channel
    /// range. Fails with [`EngineError::BufferUnderrun`] when the window
    /// is ahead of the hardware (retry after a short wait) or has been
    /// overwritten by ring wraparound (data lost to a missed drain
    /// deadline).
    pub fn read_window(&self, start_scan: u64, scans: usize) -> Result<Vec<f64>> {
        // Poll first so lazily paced hardware has delivered everything it
        // owes, and so a fault is seen before serving data.
        let status = self.status()?;
        if status.state == ScanState::Error {
            return Err(self.fault_error(&self.inner.lock()));
        }

        let ring = self.ring().ok_or_else(|| EngineError::InvalidParameters {
            message: "no input scan has been started".to_string(),
        })?;
        ring.read_window(start_scan, scans)
    }

    /// Non-blocking progress/state query.
    ///
    /// Safe to call from a polling thread while another thread starts or
    /// stops scans; it reads monotonic counters and the driver state only.
    pub fn status(&self) -> Result<ScanStatus> {
        let mut inner = self.inner.lock();
        let transfer = self.subdevice.poll()?;
        if let Some(message) = transfer.fault {
            self.record_fault(&mut inner, message);
        } else if inner.state == ScanState::Running && !transfer.running {
            debug!(scans = transfer.total_scans, "Input scan completed");
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
    /// Idempotent when already idle. The ring and its contents survive the
    /// stop so final windows can still be read.
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
                    message: "input scan did not reach idle after cancel".to_string(),
                });
            }
            std::thread::sleep(Duration::from_micros(200));
        }

        let mut inner = self.inner.lock();
        if inner.state == ScanState::Running {
            info!("Stopped input scan");
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

    /// The ring backing the current (or last) scan.
    pub fn ring(&self) -> Option<Arc<SampleRing>> {
        self.inner.lock().ring.clone()
    }

    /// Parameters of the current (or last) scan.
    pub fn params(&self) -> Option<ScanParameters> {
        self.inner.lock().params.clone()
    }

    /// Last device-reported fault, if the driver is in ERROR state.
    pub fn fault(&self) -> Option<String> {
        self.inner.lock().fault.clone()
    }

    fn sync_completion(&self, inner: &mut InputState) -> Result<()> {
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

    fn record_fault(&self, inner: &mut InputState, message: String) {
        if inner.state != ScanState::Error {
            warn!(fault = %message, "Input driver entered ERROR state");
        }
        inner.state = ScanState::Error;
        inner.fault = Some(message);
    }

    fn fault_error(&self, inner: &InputState) -> EngineError {
        EngineError::HardwareFault {
            message: inner
                .fault
                .clone()
                .unwrap_or_else(|| "unspecified device fault".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnderrunKind;
    use crate::sim::{SimConfig, SimDevice};

    fn scanner() -> (SimDevice, AnalogInputScanner) {
        let device = SimDevice::new(SimConfig::default());
        let subdevice = crate::device::DaqDevice::input(&device).unwrap();
        (device, AnalogInputScanner::new(subdevice))
    }

    fn wait_for_scans(ai: &AnalogInputScanner, scans: u64) -> ScanStatus {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let status = ai.status().unwrap();
            if status.total_scans >= scans || status.state != ScanState::Running {
                return status;
            }
            assert!(Instant::now() < deadline, "scan never produced {scans} scans");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn scan_then_stop_leaves_idle_and_stop_is_idempotent() {
        let (_device, ai) = scanner();
        ai.scan(ScanParameters::new(0, 3, 10_000.0, 1000).continuous())
            .unwrap();
        assert!(ai.status().unwrap().is_running());

        ai.stop().unwrap();
        assert_eq!(ai.status().unwrap().state, ScanState::Idle);
        ai.stop().unwrap();
        assert_eq!(ai.status().unwrap().state, ScanState::Idle);
    }

    #[test]
    fn concurrent_scan_starts_exactly_one_wins() {
        let (_device, ai) = scanner();
        let ai = Arc::new(ai);
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ai = Arc::clone(&ai);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    ai.scan(ScanParameters::new(0, 1, 10_000.0, 500).continuous())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::HardwareBusy { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(busy, 1);
        ai.stop().unwrap();
    }

    #[test]
    fn window_reads_track_the_scan() {
        let (_device, ai) = scanner();
        ai.scan(ScanParameters::new(0, 1, 50_000.0, 2000).continuous())
            .unwrap();
        wait_for_scans(&ai, 100);

        let window = ai.read_window(0, 50).unwrap();
        assert_eq!(window.len(), 100);
        // Sim levels: 0.0 on channel 0, 0.1 on channel 1, no noise.
        assert!((window[0] - 0.0).abs() < 1e-12);
        assert!((window[1] - 0.1).abs() < 1e-12);
        ai.stop().unwrap();
    }

    #[test]
    fn window_older_than_one_depth_is_overwritten_not_stale() {
        let (_device, ai) = scanner();
        // Tiny ring so wraparound happens fast: depth 100 at 100 kHz = 1 ms.
        ai.scan(ScanParameters::new(0, 0, 100_000.0, 100).continuous())
            .unwrap();
        wait_for_scans(&ai, 350);

        let err = ai.read_window(0, 100).unwrap_err();
        assert!(matches!(
            err,
            EngineError::BufferUnderrun {
                kind: UnderrunKind::Overwritten,
                ..
            }
        ));
        ai.stop().unwrap();
    }

    #[test]
    fn future_window_is_not_yet_sampled() {
        let (_device, ai) = scanner();
        ai.scan(ScanParameters::new(0, 0, 1000.0, 10_000).continuous())
            .unwrap();

        let err = ai.read_window(1_000_000, 10).unwrap_err();
        assert!(err.is_retryable());
        ai.stop().unwrap();
    }

    #[test]
    fn read_without_scan_is_rejected() {
        let (_device, ai) = scanner();
        assert!(matches!(
            ai.read_window(0, 1).unwrap_err(),
            EngineError::InvalidParameters { .. }
        ));
    }

    #[test]
    fn invalid_range_fails_before_hardware() {
        let (_device, ai) = scanner();
        // Default sim has 8 input channels.
        let err = ai
            .scan(ScanParameters::new(0, 8, 1000.0, 100))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange { max: 8, .. }));
        assert_eq!(ai.status().unwrap().state, ScanState::Idle);
    }

    #[test]
    fn fault_mid_scan_turns_state_error() {
        let (device, ai) = scanner();
        ai.scan(ScanParameters::new(0, 0, 1000.0, 1000).continuous())
            .unwrap();
        device.sim_input().inject_fault("ADC saturation");

        assert_eq!(ai.status().unwrap().state, ScanState::Error);
        assert!(matches!(
            ai.read_window(0, 1).unwrap_err(),
            EngineError::HardwareFault { .. }
        ));
        assert!(ai.fault().is_some());

        device.sim_input().clear_fault();
        ai.stop().unwrap();
        ai.reset();
        assert_eq!(ai.status().unwrap().state, ScanState::Idle);
    }
}
