//! Simulated DAQ device for tests, demos and development without hardware.
//!
//! The simulation is paced by wall-clock time: samples "arrive" lazily when
//! the subdevice is polled, at the configured rate, so no background thread
//! is needed and tests stay deterministic as long as they poll. Synthetic
//! input levels are fixed per channel with optional noise; faults can be
//! injected to exercise the ERROR paths.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::device::{
    DaqDevice, DeviceDescriptor, InputSubdevice, OutputSubdevice, TransferStatus,
};
use crate::error::{EngineError, Result};
use crate::params::ScanParameters;
use crate::ring::SampleRing;

/// Configuration for the simulated device.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of analog input channels.
    pub input_channels: u32,
    /// Number of analog output channels.
    pub output_channels: u32,
    /// Synthetic level produced on each input channel, in volts.
    pub input_levels: Vec<f64>,
    /// Peak uniform noise added to every input sample, in volts.
    pub noise: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            input_channels: 8,
            output_channels: 4,
            input_levels: (0..8).map(|ch| 0.1 * ch as f64).collect(),
            noise: 0.0,
        }
    }
}

/// In-flight simulated input scan.
struct InputRun {
    ring: Arc<SampleRing>,
    rate: f64,
    low_channel: u32,
    started: Instant,
    /// Scans already produced into the ring.
    produced: u64,
    /// Scan count after which a finite scan completes.
    target: Option<u64>,
}

/// Simulated analog input subdevice.
pub struct SimInput {
    channels: u32,
    levels: Vec<f64>,
    noise: f64,
    run: Mutex<Option<InputRun>>,
    fault: Mutex<Option<String>>,
}

impl SimInput {
    fn new(config: &SimConfig) -> Self {
        Self {
            channels: config.input_channels,
            levels: config.input_levels.clone(),
            noise: config.noise,
            run: Mutex::new(None),
            fault: Mutex::new(None),
        }
    }

    /// Report a hardware fault on the next poll.
    pub fn inject_fault(&self, message: &str) {
        *self.fault.lock() = Some(message.to_string());
    }

    /// Clear an injected fault.
    pub fn clear_fault(&self) {
        *self.fault.lock() = None;
    }

    fn pump(&self, run: &mut InputRun) {
        let elapsed = run.started.elapsed().as_secs_f64();
        let mut expected = (elapsed * run.rate) as u64;
        if let Some(target) = run.target {
            expected = expected.min(target);
        }
        let pending = expected.saturating_sub(run.produced);
        if pending == 0 {
            return;
        }

        let channel_count = run.ring.channel_count();
        let mut rng = rand::thread_rng();
        let mut batch = Vec::with_capacity(pending as usize * channel_count);
        for _ in 0..pending {
            for slot in 0..channel_count {
                let channel = run.low_channel as usize + slot;
                let base = self.levels.get(channel).copied().unwrap_or(0.0);
                let noise = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..=self.noise)
                } else {
                    0.0
                };
                batch.push(base + noise);
            }
        }
        run.ring.push_scans(&batch);
        run.produced = expected;
    }
}

impl InputSubdevice for SimInput {
    fn channel_count(&self) -> u32 {
        self.channels
    }

    fn begin_scan(&self, params: &ScanParameters, ring: Arc<SampleRing>) -> Result<f64> {
        let mut run = self.run.lock();
        let still_active = run.as_ref().is_some_and(|r| match r.target {
            None => true,
            Some(t) => ((r.started.elapsed().as_secs_f64() * r.rate) as u64) < t,
        });
        if still_active {
            return Err(EngineError::HardwareBusy {
                resource: "analog input",
            });
        }

        let target = (!params.options.is_continuous()).then(|| params.samples_per_channel as u64);
        debug!(
            rate = params.sample_rate,
            depth = params.samples_per_channel,
            continuous = params.options.is_continuous(),
            "sim: input scan started"
        );
        *run = Some(InputRun {
            ring,
            rate: params.sample_rate,
            low_channel: params.low_channel,
            started: Instant::now(),
            produced: 0,
            target,
        });
        Ok(params.sample_rate)
    }

    fn poll(&self) -> Result<TransferStatus> {
        if let Some(message) = self.fault.lock().clone() {
            return Ok(TransferStatus {
                running: false,
                total_scans: 0,
                current_index: 0,
                fault: Some(message),
            });
        }

        let mut guard = self.run.lock();
        let Some(run) = guard.as_mut() else {
            return Ok(TransferStatus::default());
        };
        self.pump(run);

        let finished = run.target.is_some_and(|t| run.produced >= t);
        Ok(TransferStatus {
            running: !finished,
            total_scans: run.ring.total_scans(),
            current_index: run.ring.current_index(),
            fault: None,
        })
    }

    fn cancel(&self) -> Result<()> {
        if self.run.lock().take().is_some() {
            debug!("sim: input scan cancelled");
        }
        Ok(())
    }
}

/// In-flight simulated output scan.
struct OutputRun {
    rate: f64,
    buffer_scans: u64,
    started: Instant,
    continuous: bool,
}

/// Simulated analog output subdevice.
pub struct SimOutput {
    channels: u32,
    run: Mutex<Option<OutputRun>>,
    levels: Mutex<Vec<f64>>,
    fault: Mutex<Option<String>>,
}

impl SimOutput {
    fn new(config: &SimConfig) -> Self {
        Self {
            channels: config.output_channels,
            run: Mutex::new(None),
            levels: Mutex::new(vec![0.0; config.output_channels as usize]),
            fault: Mutex::new(None),
        }
    }

    /// Report a hardware fault on the next poll.
    pub fn inject_fault(&self, message: &str) {
        *self.fault.lock() = Some(message.to_string());
    }

    /// Clear an injected fault.
    pub fn clear_fault(&self) {
        *self.fault.lock() = None;
    }

    /// Last value written to each channel via [`OutputSubdevice::write_value`].
    pub fn levels(&self) -> Vec<f64> {
        self.levels.lock().clone()
    }

    fn progress(run: &OutputRun) -> (bool, u64) {
        let elapsed = run.started.elapsed().as_secs_f64();
        let expected = (elapsed * run.rate) as u64;
        if run.continuous {
            (true, expected)
        } else {
            (expected < run.buffer_scans, expected.min(run.buffer_scans))
        }
    }
}

impl OutputSubdevice for SimOutput {
    fn channel_count(&self) -> u32 {
        self.channels
    }

    fn begin_scan(&self, params: &ScanParameters, buffer: &[f64]) -> Result<f64> {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|r| Self::progress(r).0) {
            return Err(EngineError::HardwareBusy {
                resource: "analog output",
            });
        }

        let buffer_scans = (buffer.len() / params.channel_count()) as u64;
        debug!(
            rate = params.sample_rate,
            scans = buffer_scans,
            continuous = params.options.is_continuous(),
            "sim: output scan started"
        );
        *run = Some(OutputRun {
            rate: params.sample_rate,
            buffer_scans,
            started: Instant::now(),
            continuous: params.options.is_continuous(),
        });
        Ok(params.sample_rate)
    }

    fn write_value(&self, channel: u32, volts: f64) -> Result<()> {
        if channel >= self.channels {
            return Err(EngineError::InvalidRange {
                low: channel,
                high: channel,
                max: self.channels,
            });
        }
        self.levels.lock()[channel as usize] = volts;
        Ok(())
    }

    fn poll(&self) -> Result<TransferStatus> {
        if let Some(message) = self.fault.lock().clone() {
            return Ok(TransferStatus {
                running: false,
                total_scans: 0,
                current_index: 0,
                fault: Some(message),
            });
        }

        let guard = self.run.lock();
        let Some(run) = guard.as_ref() else {
            return Ok(TransferStatus::default());
        };
        let (running, total) = Self::progress(run);
        let index = if run.buffer_scans > 0 {
            (total % run.buffer_scans) as usize
        } else {
            0
        };
        Ok(TransferStatus {
            running,
            total_scans: total,
            current_index: index,
            fault: None,
        })
    }

    fn cancel(&self) -> Result<()> {
        if self.run.lock().take().is_some() {
            debug!("sim: output scan cancelled");
        }
        Ok(())
    }
}

struct SimDeviceInner {
    descriptor: DeviceDescriptor,
    connected: AtomicBool,
    input: Arc<SimInput>,
    output: Arc<SimOutput>,
}

/// Simulated DAQ device handle.
#[derive(Clone)]
pub struct SimDevice {
    inner: Arc<SimDeviceInner>,
}

impl SimDevice {
    /// Create a simulated device with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        Self {
            inner: Arc::new(SimDeviceInner {
                descriptor: DeviceDescriptor {
                    vendor: "nanocal".to_string(),
                    model: "sim-daq".to_string(),
                    serial: "SIM-0001".to_string(),
                },
                connected: AtomicBool::new(true),
                input: Arc::new(SimInput::new(&config)),
                output: Arc::new(SimOutput::new(&config)),
            }),
        }
    }

    /// Direct access to the simulated input, for fault injection in tests.
    pub fn sim_input(&self) -> Arc<SimInput> {
        Arc::clone(&self.inner.input)
    }

    /// Direct access to the simulated output, for assertions in tests.
    pub fn sim_output(&self) -> Arc<SimOutput> {
        Arc::clone(&self.inner.output)
    }

    /// Drop the simulated connection; `reconnect` restores it.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl DaqDevice for SimDevice {
    fn descriptor(&self) -> DeviceDescriptor {
        self.inner.descriptor.clone()
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn reconnect(&self) -> Result<()> {
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn input(&self) -> Result<Arc<dyn InputSubdevice>> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected {
                device: self.inner.descriptor.model.clone(),
            });
        }
        Ok(self.inner.input.clone() as Arc<dyn InputSubdevice>)
    }

    fn output(&self) -> Result<Arc<dyn OutputSubdevice>> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected {
                device: self.inner.descriptor.model.clone(),
            });
        }
        Ok(self.inner.output.clone() as Arc<dyn OutputSubdevice>)
    }
}
