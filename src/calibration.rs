//! Voltage ↔ temperature calibration transform.
//!
//! The transform is built once from a measured lookup table and is then a
//! stateless pair of piecewise-linear maps. Protocols snapshot the
//! transform (an `Arc` clone) at arm time; reloading a calibration installs
//! a fresh transform and can never disturb a scan in flight.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// One measured calibration pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Sample temperature in °C.
    pub temperature: f64,
    /// Applied heater voltage in volts.
    pub voltage: f64,
}

impl CalibrationPoint {
    /// Create a calibration pair.
    pub fn new(temperature: f64, voltage: f64) -> Self {
        Self {
            temperature,
            voltage,
        }
    }
}

/// Ordered set of measured (temperature, voltage) pairs.
///
/// The table arrives already parsed; its origin (file or remote call) is a
/// caller concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationTable {
    /// Measured pairs, ordered by temperature.
    pub points: Vec<CalibrationPoint>,
}

impl CalibrationTable {
    /// Build a table from (temperature, voltage) tuples.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self {
            points: pairs
                .iter()
                .map(|&(t, v)| CalibrationPoint::new(t, v))
                .collect(),
        }
    }
}

/// Bidirectional linear-interpolation transform over a calibration table.
///
/// Construction validates the table once (at least two points, strictly
/// monotonic in both dimensions), so both query directions are infallible
/// afterwards. Queries outside the table's domain extrapolate linearly from
/// the two nearest edge points; this is documented best-effort behavior,
/// not an error. The transform is immutable and safe to share across
/// threads.
#[derive(Debug, Clone)]
pub struct CalibrationTransform {
    points: Vec<CalibrationPoint>,
    voltage_ascending: bool,
}

impl CalibrationTransform {
    /// Validate the table and build the transform.
    pub fn new(table: CalibrationTable) -> Result<Self> {
        let points = table.points;
        if points.len() < 2 {
            return Err(EngineError::InvalidCalibration {
                message: format!(
                    "table needs at least two points, got {}",
                    points.len()
                ),
            });
        }
        if !strictly_monotonic(points.iter().map(|p| p.temperature)) {
            return Err(EngineError::InvalidCalibration {
                message: "temperature values are not strictly monotonic".to_string(),
            });
        }
        if !strictly_monotonic(points.iter().map(|p| p.voltage)) {
            return Err(EngineError::InvalidCalibration {
                message: "voltage values are not strictly monotonic".to_string(),
            });
        }

        let voltage_ascending = points[1].voltage > points[0].voltage;
        Ok(Self {
            points,
            voltage_ascending,
        })
    }

    /// Convenience constructor returning a shareable handle.
    pub fn shared(table: CalibrationTable) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(table)?))
    }

    /// The measured pairs backing this transform.
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Map a target temperature (°C) to the voltage that produces it.
    pub fn temperature_to_voltage(&self, temperature: f64) -> f64 {
        self.interpolate(temperature, |p| p.temperature, |p| p.voltage, true)
    }

    /// Map a measured voltage back to temperature (°C).
    pub fn voltage_to_temperature(&self, voltage: f64) -> f64 {
        self.interpolate(
            voltage,
            |p| p.voltage,
            |p| p.temperature,
            self.voltage_ascending,
        )
    }

    /// Piecewise-linear interpolation along `x`, extrapolating from the two
    /// nearest edge points outside the domain.
    fn interpolate(
        &self,
        query: f64,
        x: impl Fn(&CalibrationPoint) -> f64,
        y: impl Fn(&CalibrationPoint) -> f64,
        ascending: bool,
    ) -> f64 {
        let n = self.points.len();

        // Segment whose upper x bound is the first at or past the query;
        // edge segments double as the extrapolation lines.
        let seg = self
            .points
            .partition_point(|p| {
                if ascending {
                    x(p) < query
                } else {
                    x(p) > query
                }
            })
            .clamp(1, n - 1);

        let a = &self.points[seg - 1];
        let b = &self.points[seg];
        let (x0, x1) = (x(a), x(b));
        let (y0, y1) = (y(a), y(b));
        y0 + (query - x0) * (y1 - y0) / (x1 - x0)
    }
}

fn strictly_monotonic(values: impl Iterator<Item = f64> + Clone) -> bool {
    let ascending = values
        .clone()
        .zip(values.clone().skip(1))
        .all(|(a, b)| b > a);
    let descending = values.clone().zip(values.skip(1)).all(|(a, b)| b < a);
    ascending || descending
}
