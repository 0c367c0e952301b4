//! Run a fast-heat ramp on the software device and print a summary.
//!
//! ```sh
//! cargo run --example fast_heat
//! ```

use anyhow::Result;
use nanocal_engine::calibration::{CalibrationTable, CalibrationTransform};
use nanocal_engine::manager::ExperimentManager;
use nanocal_engine::params::ScanParameters;
use nanocal_engine::profile::{ExperimentProfile, SignalUnit};
use nanocal_engine::protocol::FastHeat;
use nanocal_engine::sim::{SimConfig, SimDevice};
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let device = SimDevice::new(SimConfig::default());
    let calibration = CalibrationTransform::shared(CalibrationTable::from_pairs(&[
        (0.0, 0.0),
        (100.0, 1.0),
        (300.0, 3.0),
        (600.0, 5.5),
    ]))?;

    let manager = Arc::new(ExperimentManager::new(
        &device,
        calibration,
        // 4 input channels at 50 kHz with a 100 ms ring.
        ScanParameters::new(0, 3, 50_000.0, 5000),
        // 2 output channels at 10 kHz.
        ScanParameters::new(0, 1, 10_000.0, 1000),
    )?);

    // 20 ms up, 30 ms down, in °C on the heater channel.
    let ramp = ExperimentProfile::from_points(
        0,
        SignalUnit::Celsius,
        &[(0.0, 25.0), (0.02, 450.0), (0.05, 25.0)],
    );

    let fast_heat = FastHeat::new(Arc::clone(&manager));
    fast_heat.arm(&[ramp])?;
    let frame = fast_heat.run()?;

    println!(
        "captured {} scans x {} channels at {:.0} Hz ({})",
        frame.len(),
        frame.channels.len(),
        frame.sample_rate,
        if frame.truncated { "TRUNCATED" } else { "complete" }
    );
    for channel in &frame.channels {
        let mean = channel.samples.iter().sum::<f64>() / channel.samples.len().max(1) as f64;
        println!("  ch{}: mean {:.3} °C", channel.channel, mean);
    }
    Ok(())
}
