//! Pure waveform generators for the analog output driver.
//!
//! Two shapes cover every experiment: a pulse buffer that holds each
//! channel at a fixed level (step-and-hold / isothermal output) and a scan
//! buffer that expands trajectory profiles by piecewise-linear
//! interpolation (ramped fast-heat output). Both produce the interleaved
//! `[scan0_ch0, scan0_ch1, ...]` layout the hardware consumes; channels in
//! the output range without a profile are driven to 0 V.

use crate::error::{EngineError, Result};
use crate::profile::ProfilePoint;

/// Voltage trajectory for one channel, already resolved to volts.
#[derive(Debug, Clone)]
pub struct VoltageProfile {
    /// Analog output channel.
    pub channel: u32,
    /// Per-sample voltages at the generator's sample rate.
    pub samples: Vec<f64>,
}

/// Generate a step-and-hold pulse buffer.
///
/// Each `(channel, volts)` pair is held for all `points` scans; channels in
/// `low..=high` without an entry are set to 0 V. Fails with
/// [`EngineError::ChannelMismatch`] when a level names a channel outside
/// the range and [`EngineError::EmptyProfile`] when `points` is zero.
pub fn pulse_buffer(levels: &[(u32, f64)], low: u32, high: u32, points: usize) -> Result<Vec<f64>> {
    if points == 0 {
        return Err(EngineError::EmptyProfile);
    }
    let channel_count = (high - low + 1) as usize;

    let mut scan = vec![0.0; channel_count];
    for &(channel, volts) in levels {
        if channel < low || channel > high {
            return Err(EngineError::ChannelMismatch {
                message: format!("level for channel {channel} outside range {low}..={high}"),
            });
        }
        scan[(channel - low) as usize] = volts;
    }

    let mut buffer = Vec::with_capacity(points * channel_count);
    for _ in 0..points {
        buffer.extend_from_slice(&scan);
    }
    Ok(buffer)
}

/// Expand trajectory points into evenly spaced samples at `sample_rate`.
///
/// Both endpoints are emitted, so a profile spanning `d` seconds yields
/// `round(d * rate) + 1` samples. Points must already be validated
/// (non-empty, strictly increasing time).
pub fn interpolate_points(points: &[ProfilePoint], sample_rate: f64) -> Vec<f64> {
    if points.len() < 2 {
        return points.iter().map(|p| p.value).collect();
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let duration = last.time_s - first.time_s;
    let n = (duration * sample_rate).round() as usize + 1;

    let mut samples = Vec::with_capacity(n);
    let mut seg = 0;
    for i in 0..n {
        let t = if n == 1 {
            first.time_s
        } else {
            first.time_s + duration * i as f64 / (n - 1) as f64
        };
        while seg + 2 < points.len() && points[seg + 1].time_s < t {
            seg += 1;
        }
        let a = points[seg];
        let b = points[seg + 1];
        let frac = ((t - a.time_s) / (b.time_s - a.time_s)).clamp(0.0, 1.0);
        samples.push(a.value + frac * (b.value - a.value));
    }
    samples
}

/// Interleave per-channel voltage trajectories into one scan buffer.
///
/// All trajectories must be the same length and name channels inside
/// `low..=high`; unused channels are filled with 0 V. Returns the buffer
/// sized `points × channel_count`.
pub fn scan_buffer(profiles: &[VoltageProfile], low: u32, high: u32) -> Result<Vec<f64>> {
    if profiles.is_empty() || profiles.iter().any(|p| p.samples.is_empty()) {
        return Err(EngineError::EmptyProfile);
    }

    let points = profiles[0].samples.len();
    for profile in profiles {
        if profile.samples.len() != points {
            return Err(EngineError::ChannelMismatch {
                message: format!(
                    "channel {} has {} samples, expected {}",
                    profile.channel,
                    profile.samples.len(),
                    points
                ),
            });
        }
        if profile.channel < low || profile.channel > high {
            return Err(EngineError::ChannelMismatch {
                message: format!(
                    "profile for channel {} outside range {low}..={high}",
                    profile.channel
                ),
            });
        }
    }

    let channel_count = (high - low + 1) as usize;
    let mut buffer = vec![0.0; points * channel_count];
    for profile in profiles {
        let offset = (profile.channel - low) as usize;
        for (scan, &volts) in profile.samples.iter().enumerate() {
            buffer[scan * channel_count + offset] = volts;
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ExperimentProfile, SignalUnit};

    #[test]
    fn pulse_buffer_holds_levels_and_zeroes_the_rest() {
        let buffer = pulse_buffer(&[(0, 0.1), (2, 1.5)], 0, 3, 3).unwrap();
        assert_eq!(buffer.len(), 12);
        assert_eq!(&buffer[..4], &[0.1, 0.0, 1.5, 0.0]);
        assert_eq!(&buffer[8..], &[0.1, 0.0, 1.5, 0.0]);
    }

    #[test]
    fn pulse_buffer_rejects_out_of_range_channel() {
        let err = pulse_buffer(&[(5, 1.0)], 0, 3, 10).unwrap_err();
        assert!(matches!(err, EngineError::ChannelMismatch { .. }));
        assert!(matches!(
            pulse_buffer(&[(0, 1.0)], 0, 3, 0).unwrap_err(),
            EngineError::EmptyProfile
        ));
    }

    #[test]
    fn interpolation_includes_both_endpoints() {
        let profile = ExperimentProfile::from_points(
            0,
            SignalUnit::Volts,
            &[(0.0, 20.0), (1.0, 100.0), (2.0, 20.0)],
        );
        let samples = interpolate_points(&profile.points, 10.0);

        // 2 s at 10 Hz: 21 samples, up then down, apex at the midpoint.
        assert_eq!(samples.len(), 21);
        assert!((samples[0] - 20.0).abs() < 1e-9);
        assert!((samples[10] - 100.0).abs() < 1e-9);
        assert!((samples[20] - 20.0).abs() < 1e-9);
        assert!(samples[..11].windows(2).all(|w| w[1] >= w[0]));
        assert!(samples[10..].windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn scan_buffer_interleaves_row_major() {
        let profiles = vec![
            VoltageProfile {
                channel: 0,
                samples: vec![1.0, 2.0],
            },
            VoltageProfile {
                channel: 1,
                samples: vec![10.0, 20.0],
            },
        ];
        let buffer = scan_buffer(&profiles, 0, 1).unwrap();
        assert_eq!(buffer, vec![1.0, 10.0, 2.0, 20.0]);
    }

    #[test]
    fn scan_buffer_rejects_mismatched_lengths() {
        let profiles = vec![
            VoltageProfile {
                channel: 0,
                samples: vec![1.0, 2.0],
            },
            VoltageProfile {
                channel: 1,
                samples: vec![10.0],
            },
        ];
        assert!(matches!(
            scan_buffer(&profiles, 0, 1).unwrap_err(),
            EngineError::ChannelMismatch { .. }
        ));
    }
}
