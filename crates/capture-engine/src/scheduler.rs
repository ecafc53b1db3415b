//! Tick sources for the live compositor.
//!
//! A scheduler does not call back into the recorder. It counts ticks that
//! have come due and the recorder collects them in
//! [`crate::RecordingController::pump`]. Tests swap in [`ManualScheduler`]
//! and advance time by hand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed-interval tick source.
pub trait Scheduler: Send {
    /// Start (or restart) ticking every `interval`.
    fn schedule(&mut self, interval: Duration);

    /// Stop ticking. Ticks not yet collected are discarded.
    fn cancel(&mut self);

    fn is_active(&self) -> bool;

    /// Number of ticks that came due since the last call.
    fn due_ticks(&mut self) -> u64;

    /// How long until the next tick, if one is scheduled.
    fn time_until_next_tick(&self) -> Option<Duration> {
        None
    }
}

/// Wall-clock scheduler anchored at the moment it was scheduled.
///
/// Due ticks are derived from elapsed time, so late collection never
/// drifts the cadence; it just reports several ticks at once.
#[derive(Debug, Default)]
pub struct IntervalScheduler {
    interval: Option<Duration>,
    anchor: Option<Instant>,
    delivered: u64,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn elapsed_ticks(&self) -> u64 {
        match (self.interval, self.anchor) {
            (Some(interval), Some(anchor)) if !interval.is_zero() => {
                (anchor.elapsed().as_nanos() / interval.as_nanos()) as u64
            }
            _ => 0,
        }
    }
}

impl Scheduler for IntervalScheduler {
    fn schedule(&mut self, interval: Duration) {
        self.interval = Some(interval);
        self.anchor = Some(Instant::now());
        self.delivered = 0;
    }

    fn cancel(&mut self) {
        self.interval = None;
        self.anchor = None;
        self.delivered = 0;
    }

    fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    fn due_ticks(&mut self) -> u64 {
        let total = self.elapsed_ticks();
        let due = total.saturating_sub(self.delivered);
        self.delivered = total;
        due
    }

    fn time_until_next_tick(&self) -> Option<Duration> {
        let interval = self.interval?;
        let anchor = self.anchor?;
        let next = interval.checked_mul(self.elapsed_ticks() as u32 + 1)?;
        Some(next.saturating_sub(anchor.elapsed()))
    }
}

#[derive(Debug, Default)]
struct ManualShared {
    active: AtomicBool,
    pending: AtomicU64,
    interval_ns: AtomicU64,
}

/// Scheduler whose ticks are released by a [`ManualTicks`] handle.
#[derive(Debug)]
pub struct ManualScheduler {
    shared: Arc<ManualShared>,
}

/// Test-side handle of a [`ManualScheduler`].
#[derive(Debug, Clone)]
pub struct ManualTicks {
    shared: Arc<ManualShared>,
}

impl ManualScheduler {
    pub fn new() -> (Self, ManualTicks) {
        let shared = Arc::new(ManualShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ManualTicks { shared },
        )
    }
}

impl ManualTicks {
    /// Release `n` ticks. Ignored while nothing is scheduled.
    pub fn advance(&self, n: u64) {
        if self.shared.active.load(Ordering::SeqCst) {
            self.shared.pending.fetch_add(n, Ordering::SeqCst);
        }
    }

    /// Release as many ticks as fit in `duration` at the scheduled
    /// interval.
    pub fn advance_by(&self, duration: Duration) {
        let interval_ns = self.shared.interval_ns.load(Ordering::SeqCst);
        if interval_ns > 0 {
            self.advance((duration.as_nanos() / interval_ns as u128) as u64);
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Interval most recently scheduled.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.shared.interval_ns.load(Ordering::SeqCst))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, interval: Duration) {
        self.shared
            .interval_ns
            .store(interval.as_nanos() as u64, Ordering::SeqCst);
        self.shared.pending.store(0, Ordering::SeqCst);
        self.shared.active.store(true, Ordering::SeqCst);
    }

    fn cancel(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.pending.store(0, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn due_ticks(&mut self) -> u64 {
        self.shared.pending.swap(0, Ordering::SeqCst)
    }
}
