//! Fixed-capacity circular sample store shared with the input hardware.
//!
//! The hardware (or its simulation) writes interleaved scans into the ring
//! and wraps back to index 0 after reaching capacity; the engine reads
//! windows out by absolute scan index and never reasons about wraparound.
//! Two explicit positions drive all index arithmetic:
//!
//! - `total_scans`: monotone count of scans ever written
//! - write index: `total_scans % depth`, the next slot to be overwritten
//!
//! Data older than one buffer depth is lost by design; that bounds memory
//! for sustained acquisition and is reported as an [`UnderrunKind::Overwritten`]
//! window, distinct from a window the hardware has not reached yet.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EngineError, Result, UnderrunKind};

/// Circular interleaved sample buffer with absolute-index window reads.
///
/// One slot holds one scan: `channel_count` consecutive samples. Writers
/// append whole scans; readers copy windows addressed by absolute scan
/// index, so a reader that keeps up sees a gapless stream.
pub struct SampleRing {
    /// Buffer depth in scans.
    depth: usize,
    /// Samples per scan.
    channel_count: usize,
    /// Interleaved storage, `depth * channel_count` samples.
    data: Mutex<Vec<f64>>,
    /// Scans ever written. Updated after the data they describe.
    total_scans: AtomicU64,
}

impl SampleRing {
    /// Allocate a ring of `depth` scans of `channel_count` samples each.
    pub fn new(depth: usize, channel_count: usize) -> Self {
        Self {
            depth,
            channel_count,
            data: Mutex::new(vec![0.0; depth * channel_count]),
            total_scans: AtomicU64::new(0),
        }
    }

    /// Buffer depth per channel, in scans.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Samples per scan.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Cumulative scans written since the scan started.
    pub fn total_scans(&self) -> u64 {
        self.total_scans.load(Ordering::Acquire)
    }

    /// Current wraparound write position, in scans.
    pub fn current_index(&self) -> usize {
        (self.total_scans() % self.depth as u64) as usize
    }

    /// Oldest scan still retained by the ring.
    pub fn oldest_scan(&self) -> u64 {
        self.total_scans().saturating_sub(self.depth as u64)
    }

    /// Append whole interleaved scans, wrapping past capacity.
    ///
    /// `samples.len()` must be a multiple of the channel count; trailing
    /// partial scans are ignored. Called by the hardware side only.
    pub fn push_scans(&self, samples: &[f64]) {
        let scans = samples.len() / self.channel_count;
        if scans == 0 {
            return;
        }

        let mut data = self.data.lock();
        let total = self.total_scans.load(Ordering::Acquire);
        let mut slot = (total % self.depth as u64) as usize;
        for scan in 0..scans {
            let src = &samples[scan * self.channel_count..(scan + 1) * self.channel_count];
            let dst = slot * self.channel_count;
            data[dst..dst + self.channel_count].copy_from_slice(src);
            slot = (slot + 1) % self.depth;
        }
        // Publish after the data is in place.
        self.total_scans
            .store(total + scans as u64, Ordering::Release);
    }

    /// Copy out `scans` scans starting at absolute scan `start_scan`,
    /// unwrapping the circular layout.
    ///
    /// Fails with [`EngineError::BufferUnderrun`] when the window end has
    /// not been written yet (`NotYetSampled`, retryable) or when its start
    /// has already been overwritten (`Overwritten`, data lost).
    pub fn read_window(&self, start_scan: u64, scans: usize) -> Result<Vec<f64>> {
        let data = self.data.lock();
        // Bounds are checked under the data lock so a concurrent writer
        // cannot overwrite the window between check and copy.
        let total = self.total_scans.load(Ordering::Acquire);
        let end = start_scan + scans as u64;

        if end > total {
            return Err(EngineError::BufferUnderrun {
                start_scan,
                scans,
                kind: UnderrunKind::NotYetSampled,
            });
        }
        if start_scan < total.saturating_sub(self.depth as u64) {
            return Err(EngineError::BufferUnderrun {
                start_scan,
                scans,
                kind: UnderrunKind::Overwritten,
            });
        }

        let mut out = Vec::with_capacity(scans * self.channel_count);
        for scan in 0..scans as u64 {
            let slot = ((start_scan + scan) % self.depth as u64) as usize;
            let src = slot * self.channel_count;
            out.extend_from_slice(&data[src..src + self.channel_count]);
        }
        Ok(out)
    }

    /// Copy out the most recent `scans` scans.
    pub fn read_latest(&self, scans: usize) -> Result<Vec<f64>> {
        let start = self.total_scans().saturating_sub(scans as u64);
        self.read_window(start, scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn scan_values(ring: &SampleRing, start: u64, scans: usize) -> Vec<f64> {
        ring.read_window(start, scans).unwrap()
    }

    #[test]
    fn sequential_write_and_read() {
        let ring = SampleRing::new(4, 2);
        ring.push_scans(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);

        assert_eq!(ring.total_scans(), 3);
        assert_eq!(ring.current_index(), 3);
        assert_eq!(scan_values(&ring, 0, 3), vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        assert_eq!(scan_values(&ring, 1, 1), vec![2.0, 20.0]);
    }

    #[test]
    fn wraparound_read_is_unwrapped() {
        let ring = SampleRing::new(3, 1);
        ring.push_scans(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        // Scans 0 and 1 are gone; 2..5 survive, physically wrapped.
        assert_eq!(ring.current_index(), 2);
        assert_eq!(scan_values(&ring, 2, 3), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn unwritten_window_is_not_yet_sampled() {
        let ring = SampleRing::new(8, 1);
        ring.push_scans(&[1.0, 2.0]);

        let err = ring.read_window(0, 5).unwrap_err();
        assert!(matches!(
            err,
            EngineError::BufferUnderrun {
                kind: UnderrunKind::NotYetSampled,
                ..
            }
        ));
    }

    #[test]
    fn overwritten_window_is_reported_never_served_stale() {
        let ring = SampleRing::new(4, 1);
        ring.push_scans(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        // Scan 0 and 1 are older than one depth: lost.
        let err = ring.read_window(0, 2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::BufferUnderrun {
                kind: UnderrunKind::Overwritten,
                ..
            }
        ));
        // The retained window is exact.
        assert_eq!(scan_values(&ring, 2, 4), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn read_latest_tracks_the_write_position() {
        let ring = SampleRing::new(4, 1);
        ring.push_scans(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ring.read_latest(2).unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn concurrent_reader_never_sees_torn_scans() {
        let ring = Arc::new(SampleRing::new(64, 2));
        let writer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..512u64 {
                    let v = i as f64;
                    ring.push_scans(&[v, -v]);
                }
            })
        };

        // Every successfully read scan must be an (v, -v) pair.
        for _ in 0..200 {
            if let Ok(window) = ring.read_latest(8) {
                for pair in window.chunks(2) {
                    assert_eq!(pair[0] + pair[1], 0.0);
                }
            }
        }
        writer.join().unwrap();
    }
}
