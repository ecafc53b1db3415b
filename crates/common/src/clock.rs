//! Clock and timing utilities.
//!
//! Two notions of time coexist in a recording:
//! - the wall clock, anchored by [`RecordingClock`] when a scheduler starts
//! - media time, counted in ticks by [`ElapsedTimer`] so that pausing and
//!   deterministic test drivers agree on the elapsed duration

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A monotonic clock anchored to the moment it was started.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,
    epoch_wall: DateTime<Utc>,
}

impl RecordingClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
        }
    }

    /// Nanoseconds elapsed since the clock started.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Seconds elapsed since the clock started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> DateTime<Utc> {
        self.epoch_wall
    }

    /// Convert nanoseconds to seconds.
    pub fn ns_to_secs(ns: u64) -> f64 {
        ns as f64 / NANOS_PER_SEC as f64
    }

    /// Convert non-negative seconds to nanoseconds, rounding to nearest.
    pub fn secs_to_ns(secs: f64) -> u64 {
        (secs.max(0.0) * NANOS_PER_SEC as f64).round() as u64
    }
}

/// Duration of one frame at `fps` (clamped to at least 1 fps).
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_nanos(NANOS_PER_SEC / fps.max(1) as u64)
}

/// Pause-aware elapsed-time accounting driven by render ticks.
///
/// Each tick contributes exactly `1 / fps` seconds. Ticks delivered while
/// paused are ignored, so elapsed time stops advancing during a pause and
/// resumes from the same value.
#[derive(Debug, Clone)]
pub struct ElapsedTimer {
    fps: u32,
    ticks: u64,
    paused: bool,
}

impl ElapsedTimer {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            ticks: 0,
            paused: false,
        }
    }

    /// Account for `n` ticks. Returns the number actually counted.
    pub fn advance(&mut self, n: u64) -> u64 {
        if self.paused {
            return 0;
        }
        self.ticks += n;
        n
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ticks counted so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Elapsed media time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.ticks as f64 / self.fps as f64
    }

    /// Elapsed media time in nanoseconds.
    pub fn elapsed_ns(&self) -> u64 {
        (self.ticks as u128 * NANOS_PER_SEC as u128 / self.fps as u128) as u64
    }

    /// Whole elapsed seconds (integer division, so never rounds up).
    pub fn whole_secs(&self) -> u64 {
        self.ticks / self.fps as u64
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (ns).
    pub reference_ns: u64,
    /// Timestamp in the measured stream (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RecordingClock::start();
        assert!(clock.elapsed_ns() < NANOS_PER_SEC);
        assert!(clock.epoch_wall() <= Utc::now());
    }

    #[test]
    fn test_ns_to_secs_conversion() {
        assert!((RecordingClock::ns_to_secs(1_500_000_000) - 1.5).abs() < 1e-9);
        assert_eq!(RecordingClock::secs_to_ns(2.0), 2_000_000_000);
        assert_eq!(RecordingClock::secs_to_ns(-1.0), 0);
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(30), Duration::from_nanos(33_333_333));
        assert_eq!(frame_interval(0), Duration::from_secs(1));
    }

    #[test]
    fn test_elapsed_timer_counts_whole_seconds() {
        let mut timer = ElapsedTimer::new(30);
        timer.advance(150);
        assert_eq!(timer.whole_secs(), 5);
        assert!((timer.elapsed_secs() - 5.0).abs() < 1e-12);
        assert_eq!(timer.elapsed_ns(), 5_000_000_000);

        timer.advance(29);
        assert_eq!(timer.whole_secs(), 5);
    }

    #[test]
    fn test_elapsed_timer_ignores_ticks_while_paused() {
        let mut timer = ElapsedTimer::new(30);
        timer.advance(45);
        let before = timer.elapsed_secs();

        timer.pause();
        assert_eq!(timer.advance(90), 0);
        assert_eq!(timer.elapsed_secs(), before);

        timer.resume();
        timer.advance(15);
        assert!((timer.elapsed_secs() - (before + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            reference_ns: 1_000_000_000,
            measured_ns: 1_050_000_000,
        };
        assert_eq!(drift.drift_ns(), 50_000_000);
        assert!((drift.drift_ms() - 50.0).abs() < 1e-9);
        assert!(drift.exceeds_threshold_ms(10.0));
        assert!(!drift.exceeds_threshold_ms(100.0));
    }
}
