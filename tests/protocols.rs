//! End-to-end protocol runs against the software device.

use nanocal_engine::calibration::{CalibrationTable, CalibrationTransform};
use nanocal_engine::manager::ExperimentManager;
use nanocal_engine::params::ScanParameters;
use nanocal_engine::profile::{ChannelSetpoint, ExperimentProfile, SignalUnit};
use nanocal_engine::protocol::{ArmState, FastHeat, Isothermal};
use nanocal_engine::sim::{SimConfig, SimDevice};
use nanocal_engine::EngineError;
use std::sync::Arc;
use std::time::Duration;

fn calibration() -> Arc<CalibrationTransform> {
    CalibrationTransform::shared(CalibrationTable::from_pairs(&[
        (0.0, 0.0),
        (100.0, 1.0),
        (300.0, 3.0),
    ]))
    .unwrap()
}

fn manager_on(device: &SimDevice) -> Arc<ExperimentManager> {
    Arc::new(
        ExperimentManager::new(
            device,
            calibration(),
            ScanParameters::new(0, 3, 50_000.0, 5000),
            ScanParameters::new(0, 1, 10_000.0, 1000),
        )
        .unwrap(),
    )
}

#[test]
fn fast_heat_end_to_end() {
    let device = SimDevice::new(SimConfig::default());
    let manager = manager_on(&device);
    let fast_heat = FastHeat::new(Arc::clone(&manager));

    // 30 ms triangle ramp in °C on the heater channel.
    fast_heat
        .arm(&[ExperimentProfile::from_points(
            0,
            SignalUnit::Celsius,
            &[(0.0, 20.0), (0.015, 250.0), (0.03, 20.0)],
        )])
        .unwrap();

    let frame = fast_heat.run().unwrap();
    assert_eq!(fast_heat.sequencer().state(), ArmState::Finished);

    // Capture brackets the ramp: at least the ramp duration of scans.
    assert!(
        frame.len() >= 1500,
        "expected >= 30 ms of 50 kHz capture, got {} scans",
        frame.len()
    );
    assert!(!frame.truncated);
    assert_eq!(frame.channels.len(), 4);

    // Channel 1 sits at the sim's 0.1 V level, 10 °C on this table.
    let ch1 = frame.channel(1).unwrap();
    assert!(ch1.samples.iter().all(|&t| (t - 10.0).abs() < 1e-6));

    // Time axis is contiguous at the achieved rate.
    let dt = 1.0 / frame.sample_rate;
    for pair in frame.time_s.windows(2) {
        assert!((pair[1] - pair[0] - dt).abs() < 1e-9);
    }

    // Nothing is left running after an auto-finished ramp.
    assert!(!manager.ao_status().unwrap().is_running());
    assert!(!manager.ai_status().unwrap().is_running());
}

#[test]
fn fast_heat_requires_reset_between_runs() {
    let device = SimDevice::new(SimConfig::default());
    let manager = manager_on(&device);
    let fast_heat = FastHeat::new(manager);

    let ramp = ExperimentProfile::from_points(0, SignalUnit::Volts, &[(0.0, 0.0), (0.01, 1.0)]);
    fast_heat.arm(std::slice::from_ref(&ramp)).unwrap();
    fast_heat.run().unwrap();

    assert!(matches!(
        fast_heat.run().unwrap_err(),
        EngineError::NotArmed
    ));
    assert!(matches!(
        fast_heat.arm(std::slice::from_ref(&ramp)).unwrap_err(),
        EngineError::AlreadyArmed
    ));

    fast_heat.reset().unwrap();
    fast_heat.arm(std::slice::from_ref(&ramp)).unwrap();
    let frame = fast_heat.run().unwrap();
    assert!(!frame.is_empty());
}

#[test]
fn isothermal_paired_halt_leaves_no_scan_running() {
    let device = SimDevice::new(SimConfig::default());
    let manager = manager_on(&device);
    let iso = Isothermal::new(Arc::clone(&manager));

    iso.arm(&[
        ChannelSetpoint::celsius(0, 150.0),
        ChannelSetpoint::volts(1, 0.2),
    ])
    .unwrap();
    iso.run().unwrap();

    // The hold drives the converted setpoint: 150 °C is 1.5 V here.
    let levels = device.sim_output().levels();
    assert!((levels[0] - 1.5).abs() < 1e-9 || manager.ao_status().unwrap().is_running());

    std::thread::sleep(Duration::from_millis(40));
    let frame = iso.stop().unwrap();
    assert!(!frame.is_empty());
    assert_eq!(iso.sequencer().state(), ArmState::Finished);

    // Both halves of the pair are idle, never just one.
    assert!(!manager.ao_status().unwrap().is_running());
    assert!(!manager.ai_status().unwrap().is_running());
}

#[test]
fn sequencing_errors_are_ordered() {
    let device = SimDevice::new(SimConfig::default());
    let manager = manager_on(&device);
    let iso = Isothermal::new(manager);

    // Run before arm.
    assert!(matches!(iso.run().unwrap_err(), EngineError::NotArmed));
    // Empty arm.
    assert!(matches!(iso.arm(&[]).unwrap_err(), EngineError::EmptyProfile));

    iso.arm(&[ChannelSetpoint::volts(0, 0.1)]).unwrap();
    // Double arm.
    assert!(matches!(
        iso.arm(&[ChannelSetpoint::volts(0, 0.1)]).unwrap_err(),
        EngineError::AlreadyArmed
    ));
    iso.run().unwrap();
    // Double run.
    assert!(matches!(iso.run().unwrap_err(), EngineError::Busy));
    // Reset while running.
    assert!(matches!(iso.reset().unwrap_err(), EngineError::Busy));

    iso.stop().unwrap();
    iso.reset().unwrap();
    assert_eq!(iso.sequencer().state(), ArmState::Unarmed);
}

#[test]
fn hardware_fault_during_hold_surfaces_and_clears_on_reset() {
    let device = SimDevice::new(SimConfig::default());
    let manager = manager_on(&device);
    let iso = Isothermal::new(Arc::clone(&manager));

    iso.arm(&[ChannelSetpoint::volts(0, 0.3)]).unwrap();
    iso.run().unwrap();

    device.sim_input().inject_fault("simulated FIFO overrun");
    std::thread::sleep(Duration::from_millis(10));

    // The fault latches the input driver in its error state.
    let status = manager.ai_status().unwrap();
    assert_eq!(status.state, nanocal_engine::ScanState::Error);

    device.sim_input().clear_fault();
    iso.stop().unwrap();
    iso.reset().unwrap();
    assert_eq!(iso.sequencer().state(), ArmState::Unarmed);

    // Reset also cleared the latched driver fault: a fresh hold works.
    iso.arm(&[ChannelSetpoint::volts(0, 0.1)]).unwrap();
    iso.run().unwrap();
    iso.stop().unwrap();
}
