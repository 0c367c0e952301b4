//! Hold a fixed temperature for one second while streaming live blocks
//! to a sink, then print the captured record.
//!
//! ```sh
//! cargo run --example isothermal_hold
//! ```

use anyhow::Result;
use nanocal_engine::calibration::{CalibrationTable, CalibrationTransform};
use nanocal_engine::manager::ExperimentManager;
use nanocal_engine::params::ScanParameters;
use nanocal_engine::profile::{ChannelSetpoint, SignalUnit};
use nanocal_engine::protocol::Isothermal;
use nanocal_engine::sim::{SimConfig, SimDevice};
use std::sync::Arc;
use std::time::Duration;

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
    ]))?;

    let manager = Arc::new(ExperimentManager::new(
        &device,
        calibration,
        ScanParameters::new(0, 3, 20_000.0, 4000),
        ScanParameters::new(0, 1, 5000.0, 500),
    )?);
    let mut live = manager.add_sink("console", 32)?;

    let iso = Isothermal::new(Arc::clone(&manager));
    iso.arm(&[ChannelSetpoint::celsius(0, 120.0)])?;
    iso.run()?;

    // Consume live blocks while the hold runs.
    let watcher = std::thread::spawn(move || {
        let mut blocks = 0u64;
        while let Some(block) = live.blocking_recv() {
            blocks += 1;
            let scans = block.data.len() / block.channel_count;
            println!(
                "live block {blocks}: scans {}..{}",
                block.start_scan,
                block.start_scan + scans as u64
            );
        }
        blocks
    });

    std::thread::sleep(Duration::from_secs(1));
    let frame = iso.stop()?;
    let drops = manager.sink_drops();
    // Dropping the sink's sender lets the watcher drain out and exit.
    manager.remove_sink("console");
    let blocks = watcher.join().expect("watcher thread panicked");

    println!(
        "hold finished: {} scans, {} live blocks, drops {drops:?}",
        frame.len(),
        blocks,
    );
    Ok(())
}
