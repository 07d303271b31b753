//! Clock synchronization against the remote update source.
//!
//! A four-timestamp ping/pong exchange (all unsigned 32-bit
//! microsecond values on the wire) yields per-sample estimates of the
//! clock offset `theta` and the round-trip uncertainty `delta`:
//!
//! ```text
//! theta = ((t1 - t0) + (t2 - t3)) / 2
//! delta = max(0, (t3 - t0) - (t2 - t1))
//! ```
//!
//! Samples go into a small ring; the sample with the smallest `delta`
//! is the most trustworthy offset estimate and is used to translate
//! remote timestamps into local time. "Not enough samples yet" is a
//! defined steady state, not an error.

use std::time::Duration;

// ── Constants ────────────────────────────────────────────────────

/// Default period between outbound pings.
pub const PING_PERIOD: Duration = Duration::from_secs(1);

/// Default ring capacity.
pub const SAMPLE_CAPACITY: usize = 16;

/// Samples required before any sample is trusted.
pub const MIN_SAMPLE_COUNT: usize = 3;

// ── ClockSample ──────────────────────────────────────────────────

/// One offset estimate with its round-trip uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Offset estimate in microseconds (remote − local).
    pub theta: i32,
    /// Round-trip uncertainty in microseconds.
    pub delta: u32,
}

// ── PingRequest ──────────────────────────────────────────────────

/// Outbound clock-sync ping. Only `t0` is set; the remote end fills
/// in `t1`/`t2` and echoes the rest back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingRequest {
    /// Local send timestamp in microseconds.
    pub t0: u32,
    pub t1: u32,
    pub t2: u32,
    pub t3: u32,
}

// ── ClockSync ────────────────────────────────────────────────────

/// Ping/pong clock-offset estimator with a fixed-capacity sample ring.
#[derive(Debug)]
pub struct ClockSync {
    samples: Vec<ClockSample>,
    index: usize,
    count: usize,
    capacity: usize,
    min_samples: usize,
}

impl ClockSync {
    /// Create an estimator with the default ring size and threshold.
    pub fn new() -> Self {
        Self::with_limits(SAMPLE_CAPACITY, MIN_SAMPLE_COUNT)
    }

    /// Create an estimator with explicit ring capacity and minimum
    /// trusted sample count.
    pub fn with_limits(capacity: usize, min_samples: usize) -> Self {
        assert!(capacity > 0, "sample capacity must be > 0");
        Self {
            samples: Vec::with_capacity(capacity),
            index: 0,
            count: 0,
            capacity,
            min_samples,
        }
    }

    /// Build the ping to emit at local time `now_us`.
    pub fn make_ping(&self, now_us: u32) -> PingRequest {
        PingRequest {
            t0: now_us,
            ..Default::default()
        }
    }

    /// Process a pong reply.
    ///
    /// `t0` is the original local send time, `t1`/`t2` are the remote
    /// receive/transmit times, and `t3` is the local receive time
    /// (sampled by the caller when the reply arrived). All wrap at
    /// 2³² microseconds; the differences are computed wrapping.
    pub fn process_pong(&mut self, t0: u32, t1: u32, t2: u32, t3: u32) {
        let theta = (t1.wrapping_sub(t0) as i32 + t2.wrapping_sub(t3) as i32) / 2;
        let delta = (t3.wrapping_sub(t0) as i32 - t2.wrapping_sub(t1) as i32).max(0) as u32;

        let sample = ClockSample { theta, delta };
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

    /// Number of recorded samples (saturates at capacity).
    pub fn sample_count(&self) -> usize {
        self.count
    }

    /// The sample with the smallest round-trip uncertainty, or `None`
    /// while fewer than the minimum sample count are recorded.
    pub fn best_sample(&self) -> Option<ClockSample> {
        if self.count < self.min_samples {
            return None;
        }
        self.samples[..self.count]
            .iter()
            .copied()
            .min_by_key(|s| s.delta)
    }

    /// Translate a remote timestamp into local time, or `None` while
    /// no trusted sample exists.
    pub fn translate(&self, remote_us: u32) -> Option<u32> {
        let best = self.best_sample()?;
        Some(remote_us.wrapping_add_signed(-best.theta))
    }

    /// Worst-case uncertainty over the recorded samples.
    pub fn jitter(&self) -> u32 {
        self.samples[..self.count]
            .iter()
            .map(|s| s.delta)
            .max()
            .unwrap_or(0)
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Record a sample with chosen theta/delta by constructing
    /// matching timestamps: symmetric network, remote ahead by
    /// `theta`, one-way latency `delta / 2`.
    fn record(clock: &mut ClockSync, theta: i32, delta: u32) {
        let t0 = 1_000_000u32;
        let half = delta / 2;
        let t1 = t0.wrapping_add(half).wrapping_add_signed(theta);
        let t2 = t1;
        let t3 = t0.wrapping_add(delta);
        clock.process_pong(t0, t1, t2, t3);
    }

    #[test]
    fn pong_math_matches_formulas() {
        let mut clock = ClockSync::new();
        // t0=0, t1=600, t2=700, t3=200:
        // theta = ((600-0) + (700-200)) / 2 = 550
        // delta = (200-0) - (700-600) = 100
        clock.process_pong(0, 600, 700, 200);
        clock.process_pong(0, 600, 700, 200);
        clock.process_pong(0, 600, 700, 200);
        let best = clock.best_sample().unwrap();
        assert_eq!(best.theta, 550);
        assert_eq!(best.delta, 100);
    }

    #[test]
    fn negative_delta_clamps_to_zero() {
        let mut clock = ClockSync::with_limits(16, 1);
        // Remote interval longer than local round trip.
        clock.process_pong(0, 100, 900, 500);
        assert_eq!(clock.best_sample().unwrap().delta, 0);
    }

    #[test]
    fn too_few_samples_gives_no_best() {
        let mut clock = ClockSync::new();
        record(&mut clock, 5, 50);
        record(&mut clock, -2, 10);
        assert_eq!(clock.sample_count(), 2);
        assert!(clock.best_sample().is_none());
        assert!(clock.translate(12345).is_none());
    }

    #[test]
    fn best_sample_has_minimum_delta() {
        let mut clock = ClockSync::new();
        record(&mut clock, 5, 50);
        record(&mut clock, -2, 10);
        record(&mut clock, 1, 30);

        let best = clock.best_sample().unwrap();
        assert_eq!(best.delta, 10);
        assert_eq!(best.theta, -2);
    }

    #[test]
    fn translate_subtracts_theta() {
        let mut clock = ClockSync::new();
        record(&mut clock, 100, 4);
        record(&mut clock, 100, 4);
        record(&mut clock, 100, 4);

        assert_eq!(clock.translate(1_000), Some(900));
    }

    #[test]
    fn translate_wraps_around() {
        let mut clock = ClockSync::new();
        record(&mut clock, 100, 4);
        record(&mut clock, 100, 4);
        record(&mut clock, 100, 4);

        assert_eq!(clock.translate(50), Some(50u32.wrapping_sub(100)));
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut clock = ClockSync::with_limits(4, 3);
        // Fill with high-uncertainty samples, then push them out.
        for _ in 0..4 {
            record(&mut clock, 9, 1_000);
        }
        for _ in 0..4 {
            record(&mut clock, 3, 20);
        }
        assert_eq!(clock.sample_count(), 4);
        let best = clock.best_sample().unwrap();
        assert_eq!(best.delta, 20);
        assert_eq!(best.theta, 3);
    }

    #[test]
    fn jitter_is_max_delta() {
        let mut clock = ClockSync::new();
        assert_eq!(clock.jitter(), 0);
        record(&mut clock, 0, 10);
        record(&mut clock, 0, 80);
        record(&mut clock, 0, 40);
        assert_eq!(clock.jitter(), 80);
    }

    #[test]
    fn ping_carries_only_t0() {
        let clock = ClockSync::new();
        let ping = clock.make_ping(777);
        assert_eq!(ping.t0, 777);
        assert_eq!((ping.t1, ping.t2, ping.t3), (0, 0, 0));
    }
}
