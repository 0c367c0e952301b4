//! Experiment profile value types.
//!
//! A profile describes a desired output trajectory for one channel as an
//! ordered sequence of (time, value) points, in volts or in °C. Profiles
//! are immutable once handed to a generator; generators only borrow them.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Unit of a profile's value column (and of returned channel data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalUnit {
    /// Raw voltage; no calibration applied.
    Volts,
    /// Temperature; the calibration transform maps to/from voltage.
    Celsius,
}

/// One trajectory point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// Time from profile start, in seconds.
    pub time_s: f64,
    /// Target value in the profile's unit.
    pub value: f64,
}

/// Output trajectory for a single analog output channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentProfile {
    /// Analog output channel this trajectory drives.
    pub channel: u32,
    /// Unit of the value column.
    pub unit: SignalUnit,
    /// Ordered trajectory points; time must be strictly increasing.
    pub points: Vec<ProfilePoint>,
}

impl ExperimentProfile {
    /// Build a profile from (time_s, value) tuples.
    pub fn from_points(channel: u32, unit: SignalUnit, points: &[(f64, f64)]) -> Self {
        Self {
            channel,
            unit,
            points: points
                .iter()
                .map(|&(time_s, value)| ProfilePoint { time_s, value })
                .collect(),
        }
    }

    /// Duration of the trajectory in seconds.
    pub fn duration(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => last.time_s - first.time_s,
            _ => 0.0,
        }
    }

    /// Validate point count and time ordering.
    pub fn validate(&self) -> Result<()> {
        if self.points.is_empty() {
            return Err(EngineError::EmptyProfile);
        }
        for pair in self.points.windows(2) {
            if pair[1].time_s <= pair[0].time_s {
                return Err(EngineError::InvalidProfile {
                    message: format!(
                        "time must be strictly increasing on channel {} ({} then {})",
                        self.channel, pair[0].time_s, pair[1].time_s
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Constant setpoint for one channel, used by the isothermal protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSetpoint {
    /// Analog output channel.
    pub channel: u32,
    /// Unit of `value`.
    pub unit: SignalUnit,
    /// Held level in the given unit.
    pub value: f64,
}

impl ChannelSetpoint {
    /// A raw-voltage setpoint.
    pub fn volts(channel: u32, volts: f64) -> Self {
        Self {
            channel,
            unit: SignalUnit::Volts,
            value: volts,
        }
    }

    /// A temperature setpoint, converted through calibration when applied.
    pub fn celsius(channel: u32, celsius: f64) -> Self {
        Self {
            channel,
            unit: SignalUnit::Celsius,
            value: celsius,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_is_rejected() {
        let profile = ExperimentProfile::from_points(0, SignalUnit::Volts, &[]);
        assert!(matches!(
            profile.validate().unwrap_err(),
            EngineError::EmptyProfile
        ));
    }

    #[test]
    fn non_increasing_time_is_rejected() {
        let profile = ExperimentProfile::from_points(
            1,
            SignalUnit::Celsius,
            &[(0.0, 20.0), (1.0, 100.0), (1.0, 20.0)],
        );
        assert!(matches!(
            profile.validate().unwrap_err(),
            EngineError::InvalidProfile { .. }
        ));
    }

    #[test]
    fn duration_spans_first_to_last_point() {
        let profile = ExperimentProfile::from_points(
            0,
            SignalUnit::Volts,
            &[(0.5, 0.0), (1.0, 1.0), (3.0, 0.0)],
        );
        profile.validate().unwrap();
        assert!((profile.duration() - 2.5).abs() < 1e-12);
    }
}
