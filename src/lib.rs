//! Acquisition and generation engine for chip-based fast-scanning
//! calorimetry.
//!
//! The engine drives one data-acquisition device with paired analog
//! output (heater drive) and analog input (sensor capture) subsystems:
//!
//! - **Waveform generation** ([`waveform`], [`profile`]): expand sparse
//!   (time, value) trajectories into interleaved sample buffers, with
//!   pulse buffers for held levels and piecewise-linear ramps for scans.
//! - **Calibration** ([`calibration`]): bidirectional temperature ↔
//!   voltage mapping over a monotonic table, with linear interpolation
//!   inside the table and edge-segment extrapolation outside it.
//! - **Scanning** ([`input`], [`output`], [`ring`]): finite and
//!   continuous hardware scans over a circular sample ring addressed by
//!   monotonic absolute scan index, with underruns that distinguish
//!   not-yet-sampled data from overwritten data.
//! - **Orchestration** ([`manager`]): correlated output + input pairs,
//!   half-buffer drain to an in-memory record, live sink fan-out, and
//!   column-per-channel result frames.
//! - **Protocols** ([`protocol`]): armable fast-heat ramps and
//!   isothermal holds with an `Unarmed -> Armed -> Running -> Finished`
//!   lifecycle and calibration pinned at arm time.
//!
//! Hardware access goes through the [`device`] traits; [`sim`] provides
//! a deterministic software device for tests and development.
//!
//! # Example
//!
//! ```
//! use nanocal_engine::calibration::{CalibrationTable, CalibrationTransform};
//! use nanocal_engine::manager::ExperimentManager;
//! use nanocal_engine::params::ScanParameters;
//! use nanocal_engine::profile::{ExperimentProfile, SignalUnit};
//! use nanocal_engine::protocol::FastHeat;
//! use nanocal_engine::sim::{SimConfig, SimDevice};
//! use std::sync::Arc;
//!
//! # fn main() -> nanocal_engine::Result<()> {
//! let device = SimDevice::new(SimConfig::default());
//! let calibration = CalibrationTransform::shared(CalibrationTable::from_pairs(&[
//!     (0.0, 0.0),
//!     (300.0, 3.0),
//! ]))?;
//! let manager = Arc::new(ExperimentManager::new(
//!     &device,
//!     calibration,
//!     ScanParameters::new(0, 3, 50_000.0, 5000),
//!     ScanParameters::new(0, 1, 10_000.0, 1000),
//! )?);
//!
//! let fast_heat = FastHeat::new(manager);
//! fast_heat.arm(&[ExperimentProfile::from_points(
//!     0,
//!     SignalUnit::Celsius,
//!     &[(0.0, 20.0), (0.01, 150.0), (0.02, 20.0)],
//! )])?;
//! let frame = fast_heat.run()?;
//! assert!(!frame.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod device;
pub mod error;
pub mod input;
pub mod manager;
pub mod output;
pub mod params;
pub mod profile;
pub mod protocol;
pub mod ring;
pub mod sim;
pub mod waveform;

pub use error::{EngineError, Result, UnderrunKind};
pub use manager::{AiFrame, ChannelSeries, ExperimentManager, SampleBlock};
pub use params::{ScanOptions, ScanParameters, ScanState, ScanStatus};
pub use profile::{ChannelSetpoint, ExperimentProfile, SignalUnit};
pub use protocol::{ArmState, FastHeat, Isothermal, RunExit};
