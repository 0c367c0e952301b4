//! Experiment protocols: fast-heat ramps and isothermal holds.
//!
//! A protocol is an armable sequence over an [`ExperimentManager`]. Arming
//! validates every parameter and snapshots the calibration, so a run
//! touches hardware with nothing left to reject; running drives the
//! correlated output + input pair; stopping always halts both together.
//!
//! State machine: `Unarmed -> Armed -> Running -> Finished`, with an
//! explicit [`reset`](Sequencer::reset) required before re-arming. A
//! finished protocol keeps its captured data until reset.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationTransform;
use crate::error::{EngineError, Result};
use crate::manager::{AiFrame, ExperimentManager};
use crate::params::ScanState;
use crate::profile::{ChannelSetpoint, ExperimentProfile, SignalUnit};

/// Lifecycle of an armable protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmState {
    /// No sequence prepared.
    Unarmed,
    /// Validated and ready to run.
    Armed,
    /// Hardware in motion.
    Running,
    /// Run complete; data held until reset.
    Finished,
}

/// How a running sequence reaches `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The run blocks and finishes by itself when output playback ends.
    AutoFinish,
    /// The run returns immediately and holds until an explicit stop.
    HoldUntilStopped,
}

/// Shared arm/run/stop gating for protocols.
///
/// All state transitions happen under one lock, so two threads racing to
/// arm or run observe a consistent order.
pub struct Sequencer {
    manager: Arc<ExperimentManager>,
    exit: RunExit,
    state: Mutex<ArmState>,
}

impl Sequencer {
    fn new(manager: Arc<ExperimentManager>, exit: RunExit) -> Self {
        Self {
            manager,
            exit,
            state: Mutex::new(ArmState::Unarmed),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ArmState {
        *self.state.lock()
    }

    /// How this sequence reaches `Finished`.
    pub fn run_exit(&self) -> RunExit {
        self.exit
    }

    /// Gate an arm attempt. Only `Unarmed` may arm; a prepared or finished
    /// sequence must be reset first, and a running one refused outright.
    fn check_armable(&self) -> Result<()> {
        match *self.state.lock() {
            ArmState::Unarmed => Ok(()),
            ArmState::Armed | ArmState::Finished => Err(EngineError::AlreadyArmed),
            ArmState::Running => Err(EngineError::Busy),
        }
    }

    fn mark_armed(&self) {
        *self.state.lock() = ArmState::Armed;
    }

    /// Transition `Armed -> Running`, refusing every other source state.
    fn begin_run(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ArmState::Armed => {
                *state = ArmState::Running;
                Ok(())
            }
            ArmState::Running => Err(EngineError::Busy),
            ArmState::Unarmed | ArmState::Finished => Err(EngineError::NotArmed),
        }
    }

    fn mark_finished(&self) {
        *self.state.lock() = ArmState::Finished;
    }

    /// Halt both scans and settle the state machine.
    ///
    /// Idempotent; a run interrupted mid-flight lands in `Finished` with
    /// whatever data was captured.
    pub fn stop(&self) -> Result<()> {
        let result = self.manager.stop_all();
        let mut state = self.state.lock();
        if *state == ArmState::Running {
            *state = ArmState::Finished;
        }
        result
    }

    /// Return to `Unarmed`, discarding the prepared sequence and clearing
    /// any latched driver fault. Refused while hardware is in motion.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == ArmState::Running {
            return Err(EngineError::Busy);
        }
        self.manager.reset_faults();
        *state = ArmState::Unarmed;
        Ok(())
    }
}

struct PreparedRamp {
    buffer: Vec<f64>,
    duration: Duration,
    unit: SignalUnit,
    calibration: Arc<CalibrationTransform>,
}

/// Fast-heat protocol: a finite calibrated output ramp with synchronized
/// continuous input capture, finishing by itself when playback ends.
pub struct FastHeat {
    sequencer: Sequencer,
    prepared: Mutex<Option<PreparedRamp>>,
}

impl FastHeat {
    /// Extra wait beyond the nominal profile duration before a stuck
    /// output scan is declared faulty.
    const COMPLETION_MARGIN: Duration = Duration::from_secs(2);

    /// A fast-heat protocol over a manager, starting `Unarmed`.
    pub fn new(manager: Arc<ExperimentManager>) -> Self {
        Self {
            sequencer: Sequencer::new(manager, RunExit::AutoFinish),
            prepared: Mutex::new(None),
        }
    }

    /// The underlying state machine.
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Validate profiles, snapshot the calibration, and prepare the
    /// output buffer. Nothing touches hardware here.
    ///
    /// Every profile must cover the same time span so the interleaved
    /// buffer stays rectangular; unequal spans are a channel mismatch.
    pub fn arm(&self, profiles: &[ExperimentProfile]) -> Result<()> {
        self.sequencer.check_armable()?;
        if profiles.is_empty() {
            return Err(EngineError::EmptyProfile);
        }
        for profile in profiles {
            profile.validate()?;
        }
        let duration = profiles[0].duration();
        if profiles
            .iter()
            .any(|p| (p.duration() - duration).abs() > f64::EPSILON)
        {
            return Err(EngineError::ChannelMismatch {
                message: "profiles span unequal durations".to_string(),
            });
        }

        // Calibration is pinned now: a reload between arm and run must
        // not change what this ramp plays.
        let calibration = self.sequencer.manager.calibration();
        let buffer = self
            .sequencer
            .manager
            .build_scan_buffer(profiles, &calibration)?;
        let unit = profiles[0].unit;

        *self.prepared.lock() = Some(PreparedRamp {
            buffer,
            duration: Duration::from_secs_f64(duration),
            unit,
            calibration,
        });
        self.sequencer.mark_armed();
        info!(
            profiles = profiles.len(),
            duration_s = duration,
            "Fast heat armed"
        );
        Ok(())
    }

    /// Execute the armed ramp. Blocks until output playback completes,
    /// then stops input capture and returns the full captured frame.
    ///
    /// Lands in `Finished`; a second run without
    /// [`reset`](Sequencer::reset) + re-arm is refused.
    pub fn run(&self) -> Result<AiFrame> {
        self.sequencer.begin_run()?;
        let result = self.run_inner();
        self.sequencer.mark_finished();
        result
    }

    fn run_inner(&self) -> Result<AiFrame> {
        let ramp = self
            .prepared
            .lock()
            .take()
            .ok_or(EngineError::NotArmed)?;
        let manager = &self.sequencer.manager;

        // Input first so the capture brackets the whole ramp.
        manager.ai_continuous(true)?;
        if let Err(err) = manager.ao_scan_buffer(&ramp.buffer) {
            let _ = manager.stop_all();
            return Err(err);
        }
        info!(duration_s = ramp.duration.as_secs_f64(), "Fast heat running");

        let deadline = Instant::now() + ramp.duration + Self::COMPLETION_MARGIN;
        loop {
            let status = manager.ao_status()?;
            match status.state {
                ScanState::Idle => break,
                ScanState::Running => {
                    if Instant::now() > deadline {
                        let _ = manager.stop_all();
                        return Err(EngineError::HardwareFault {
                            message: "output scan missed its completion deadline".to_string(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                ScanState::Error => {
                    let _ = manager.stop_all();
                    return Err(EngineError::HardwareFault {
                        message: "output scan faulted during the ramp".to_string(),
                    });
                }
            }
        }

        let captured = manager.ai_continuous_stop()?;
        debug!(scans = captured, "Fast heat capture complete");
        let frame = manager.frame_in(ramp.unit, &ramp.calibration)?;
        info!(scans = frame.len(), "Fast heat finished");
        Ok(frame)
    }

    /// Abort a running ramp, halting output and input together.
    pub fn stop(&self) -> Result<()> {
        self.sequencer.stop()
    }

    /// Discard the prepared ramp and return to `Unarmed`. A refused reset
    /// leaves the prepared ramp intact.
    pub fn reset(&self) -> Result<()> {
        self.sequencer.reset()?;
        self.prepared.lock().take();
        Ok(())
    }
}

struct PreparedHold {
    setpoints: Vec<ChannelSetpoint>,
    unit: SignalUnit,
    calibration: Arc<CalibrationTransform>,
}

/// Isothermal protocol: indefinitely held output setpoints with
/// continuous input capture, running until explicitly stopped.
pub struct Isothermal {
    sequencer: Sequencer,
    prepared: Mutex<Option<PreparedHold>>,
}

impl Isothermal {
    /// An isothermal protocol over a manager, starting `Unarmed`.
    pub fn new(manager: Arc<ExperimentManager>) -> Self {
        Self {
            sequencer: Sequencer::new(manager, RunExit::HoldUntilStopped),
            prepared: Mutex::new(None),
        }
    }

    /// The underlying state machine.
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Validate setpoints and snapshot the calibration.
    pub fn arm(&self, setpoints: &[ChannelSetpoint]) -> Result<()> {
        self.sequencer.check_armable()?;
        if setpoints.is_empty() {
            return Err(EngineError::EmptyProfile);
        }
        let unit = setpoints[0].unit;
        let calibration = self.sequencer.manager.calibration();

        *self.prepared.lock() = Some(PreparedHold {
            setpoints: setpoints.to_vec(),
            unit,
            calibration,
        });
        self.sequencer.mark_armed();
        info!(channels = setpoints.len(), "Isothermal armed");
        Ok(())
    }

    /// Start the hold: held output plus saved continuous capture. Returns
    /// immediately; the hold persists until [`stop`](Self::stop).
    pub fn run(&self) -> Result<()> {
        self.sequencer.begin_run()?;
        let held = match self.prepared.lock().take() {
            Some(held) => held,
            None => {
                self.sequencer.mark_finished();
                return Err(EngineError::NotArmed);
            }
        };
        let manager = &self.sequencer.manager;

        let started = manager
            .ai_continuous(true)
            .and_then(|_| manager.ao_hold(&held.setpoints).map(|_| ()));
        if let Err(err) = started {
            // Never leave one half of the pair running alone.
            let _ = manager.stop_all();
            self.sequencer.mark_finished();
            warn!(error = %err, "Isothermal start failed");
            return Err(err);
        }
        *self.prepared.lock() = Some(held);
        info!("Isothermal hold running");
        Ok(())
    }

    /// End the hold, halting output and input together, and return the
    /// captured frame.
    ///
    /// Only a running hold can be stopped; from any other state this is a
    /// sequencing error and the prepared hold, if any, stays intact.
    pub fn stop(&self) -> Result<AiFrame> {
        if self.sequencer.state() != ArmState::Running {
            return Err(EngineError::NotArmed);
        }
        let held = self.prepared.lock().take().ok_or(EngineError::NotArmed)?;

        // Capture the record tail before the ring is torn down.
        if let Err(err) = self.sequencer.manager.ai_continuous_stop() {
            warn!(error = %err, "Isothermal input stop failed");
        }
        self.sequencer.stop()?;

        let frame = self
            .sequencer
            .manager
            .frame_in(held.unit, &held.calibration)?;
        info!(scans = frame.len(), "Isothermal hold finished");
        Ok(frame)
    }

    /// Discard the prepared hold and return to `Unarmed`. A refused reset
    /// leaves the prepared hold intact.
    pub fn reset(&self) -> Result<()> {
        self.sequencer.reset()?;
        self.prepared.lock().take();
        Ok(())
    }
}
