//! Slice timing utilities

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source used for slice deadlines
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed epoch
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock
///
/// Clones share the same time, so a test (or a simulated drawing
/// collaborator) can advance the clock the scheduler reads.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Measures the time consumed by one slice of work
#[derive(Clone, Copy, Debug, Default)]
pub struct SliceTimer {
    started: Duration,
    consumed: Duration,
}

impl SliceTimer {
    /// Mark the start of a slice
    pub fn start(&mut self, clock: &impl Clock) {
        self.started = clock.now();
    }

    /// Time since the current slice started
    pub fn elapsed(&self, clock: &impl Clock) -> Duration {
        clock.now().saturating_sub(self.started)
    }

    /// True once the slice has run longer than `budget`
    pub fn exceeded(&self, clock: &impl Clock, budget: Duration) -> bool {
        self.elapsed(clock) > budget
    }

    /// Record the end of the slice; returns its consumed time
    pub fn finish(&mut self, clock: &impl Clock) -> Duration {
        self.consumed = self.elapsed(clock);
        self.consumed
    }

    /// Consumed time of the last finished slice
    pub fn consumed(&self) -> Duration {
        self.consumed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Shrink the slice budget while the user is interacting
///
/// Faster pointer movement leaves less time per slice so the view keeps
/// up with the interaction. `pointer_speed` is clamped to [5, 20].
pub fn corrected_slice_budget(budget: Duration, pointer_speed: u32) -> Duration {
    let speed = pointer_speed.clamp(5, 20) as f64;
    budget.mul_f64((100.0 / speed).log10())
}
