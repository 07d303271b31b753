//! Rolling performance statistics.
//!
//! A [`SampleBuffer`] is a fixed-capacity ring of numeric samples;
//! once full, the oldest sample is overwritten. Statistics are always
//! computed over the currently valid count, so a partially filled
//! buffer reports correct averages.

use tracing::info;

// ── SampleStats ──────────────────────────────────────────────────

/// Summary statistics over the valid samples in a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

// ── SampleBuffer ─────────────────────────────────────────────────

/// Fixed-capacity rolling sample buffer.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Vec<f64>,
    index: usize,
    count: usize,
    capacity: usize,
}

impl SampleBuffer {
    /// Create a buffer holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            samples: Vec::with_capacity(capacity),
            index: 0,
            count: 0,
            capacity,
        }
    }

    /// Insert a sample, overwriting the oldest once full.
    pub fn add(&mut self, sample: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.index] = sample;
        }
        self.index = (self.index + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    /// Number of valid samples (saturates at capacity).
    pub fn count(&self) -> usize {
        self.count
    }

    /// Min/max/average over the valid samples, or `None` when empty.
    pub fn stats(&self) -> Option<SampleStats> {
        if self.count == 0 {
            return None;
        }

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for &sample in &self.samples[..self.count] {
            sum += sample;
            if sample < min {
                min = sample;
            }
            if sample > max {
                max = sample;
            }
        }

        Some(SampleStats {
            min,
            max,
            average: sum / self.count as f64,
        })
    }
}

// ── PerfTracker ──────────────────────────────────────────────────

/// Default number of frame-latency samples retained.
pub const FRAME_LATENCY_SAMPLE_SIZE: usize = 256;

/// Aggregated performance counters for the presentation pipeline.
#[derive(Debug)]
pub struct PerfTracker {
    frame_latency: SampleBuffer,
}

impl PerfTracker {
    /// Create a tracker with the default sample sizes.
    pub fn new() -> Self {
        Self::with_capacity(FRAME_LATENCY_SAMPLE_SIZE)
    }

    /// Create a tracker retaining `latency_samples` latency samples.
    pub fn with_capacity(latency_samples: usize) -> Self {
        Self {
            frame_latency: SampleBuffer::new(latency_samples),
        }
    }

    /// Record one end-to-end frame latency measurement in microseconds.
    pub fn record_frame_latency(&mut self, latency_us: f64) {
        self.frame_latency.add(latency_us);
    }

    /// The frame-latency sample buffer.
    pub fn frame_latency(&self) -> &SampleBuffer {
        &self.frame_latency
    }

    /// Emit a latency report (milliseconds) through `tracing`.
    pub fn log_latency_report(&self) {
        if let Some(stats) = self.frame_latency.stats() {
            info!(
                min_ms = stats.min / 1e3,
                avg_ms = stats.average / 1e3,
                max_ms = stats.max / 1e3,
                "frame latency report"
            );
        }
    }
}

impl Default for PerfTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_no_stats() {
        let buf = SampleBuffer::new(4);
        assert!(buf.stats().is_none());
        assert_eq!(buf.count(), 0);
    }

    #[test]
    fn partial_fill_divides_by_count() {
        let mut buf = SampleBuffer::new(10);
        buf.add(4.0);
        buf.add(8.0);
        let stats = buf.stats().unwrap();
        assert_eq!(stats.min, 4.0);
        assert_eq!(stats.max, 8.0);
        assert_eq!(stats.average, 6.0);
    }

    #[test]
    fn overwrite_oldest_when_full() {
        let mut buf = SampleBuffer::new(2);
        buf.add(1.0);
        buf.add(2.0);
        buf.add(3.0);

        assert_eq!(buf.count(), 2);
        let stats = buf.stats().unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.average, 2.5);
    }

    #[test]
    fn single_sample_stats() {
        let mut buf = SampleBuffer::new(8);
        buf.add(7.5);
        let stats = buf.stats().unwrap();
        assert_eq!(stats.min, 7.5);
        assert_eq!(stats.max, 7.5);
        assert_eq!(stats.average, 7.5);
    }

    #[test]
    fn negative_samples_handled() {
        let mut buf = SampleBuffer::new(4);
        buf.add(-5.0);
        buf.add(5.0);
        let stats = buf.stats().unwrap();
        assert_eq!(stats.min, -5.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.average, 0.0);
    }

    #[test]
    fn tracker_records_latency() {
        let mut perf = PerfTracker::with_capacity(4);
        perf.record_frame_latency(1_000.0);
        perf.record_frame_latency(3_000.0);
        let stats = perf.frame_latency().stats().unwrap();
        assert_eq!(stats.average, 2_000.0);
        // Must not panic with or without samples.
        perf.log_latency_report();
        PerfTracker::new().log_latency_report();
    }
}
