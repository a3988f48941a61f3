use std::thread;
use std::time::{Duration, Instant};

/// The run clock: a tick index over a finite trace.
///
/// The `Clock` maps tick indices to run time and tells the allocation loop
/// which ticks complete a control period.
///
/// # Examples
///
/// ```
/// use ev_cms::sim::clock::Clock;
///
/// let mut clock = Clock::new(3, 2.0, 2);
/// let mut ticks = Vec::new();
///
/// while let Some(tick) = clock.tick() {
///     ticks.push((tick, clock.time_of(tick), clock.is_control_tick(tick)));
/// }
/// assert_eq!(ticks, vec![(0, 0.0, true), (1, 2.0, false), (2, 4.0, true)]);
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    /// Next tick to run
    current: u64,
    /// Total ticks in the trace
    total: u64,
    /// Seconds of run time per tick
    tick_seconds: f32,
    /// Ticks per control pass
    control_ratio: u64,
}

impl Clock {
    /// Creates a clock starting at tick 0.
    ///
    /// # Arguments
    ///
    /// * `total` - Number of ticks the building-load trace covers
    /// * `tick_seconds` - Run time per tick
    /// * `control_ratio` - Ticks per control pass (must be > 0)
    ///
    /// # Panics
    ///
    /// Panics if `control_ratio` is zero.
    pub fn new(total: u64, tick_seconds: f32, control_ratio: u64) -> Self {
        assert!(control_ratio > 0, "control_ratio must be > 0");
        Self {
            current: 0,
            total,
            tick_seconds,
            control_ratio,
        }
    }

    /// Moves the next tick to `tick`, used when resuming from a checkpoint.
    pub fn resume_at(&mut self, tick: u64) {
        self.current = tick.min(self.total);
    }

    /// Advances the clock by one tick.
    ///
    /// # Returns
    ///
    /// * `Some(tick)` - The tick to run now
    /// * `None` - If the trace is exhausted
    pub fn tick(&mut self) -> Option<u64> {
        if self.current < self.total {
            let tick = self.current;
            self.current += 1;
            Some(tick)
        } else {
            None
        }
    }

    /// Index of the next tick to run.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Total ticks in the trace.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Run time of `tick` in seconds.
    pub fn time_of(&self, tick: u64) -> f32 {
        tick as f32 * self.tick_seconds
    }

    /// Tick whose run time is `time_s`, rounded to the nearest tick.
    pub fn tick_at(&self, time_s: f32) -> u64 {
        (time_s / self.tick_seconds).round().max(0.0) as u64
    }

    /// Whether completing `tick` triggers a control pass.
    pub fn is_control_tick(&self, tick: u64) -> bool {
        tick % self.control_ratio == 0
    }
}

/// Keeps the allocation loop on its wall-clock cadence.
///
/// Each tick sleeps for the period minus the time already spent; a tick that
/// overruns starts the next one immediately.
#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    started: Instant,
}

impl Pacer {
    /// Creates a pacer with the given wall-clock tick period.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            started: Instant::now(),
        }
    }

    /// Marks the start of a tick.
    pub fn start(&mut self) {
        self.started = Instant::now();
    }

    /// Time left in the current tick.
    pub fn remaining(&self) -> Duration {
        self.period.saturating_sub(self.started.elapsed())
    }

    /// Sleeps out the rest of the tick, if any.
    pub fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clock() {
        let clock = Clock::new(5, 2.0, 3);
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.total(), 5);
    }

    #[test]
    fn test_tick() {
        let mut clock = Clock::new(2, 2.0, 1);
        assert_eq!(clock.tick(), Some(0));
        assert_eq!(clock.tick(), Some(1));
        assert_eq!(clock.tick(), None);
        assert_eq!(clock.tick(), None);
    }

    #[test]
    fn test_empty_trace() {
        let mut clock = Clock::new(0, 2.0, 1);
        assert_eq!(clock.tick(), None);
    }

    #[test]
    fn control_ticks_follow_ratio() {
        let clock = Clock::new(100, 2.0, 30);
        let control: Vec<u64> = (0..100).filter(|&t| clock.is_control_tick(t)).collect();
        assert_eq!(control, vec![0, 30, 60, 90]);
    }

    #[test]
    fn resume_skips_replay() {
        let mut clock = Clock::new(10, 2.0, 5);
        clock.resume_at(clock.tick_at(14.0) + 1);
        assert_eq!(clock.tick(), Some(8));
        clock.resume_at(99);
        assert_eq!(clock.tick(), None);
    }

    #[test]
    fn overrun_tick_has_no_sleep() {
        let mut pacer = Pacer::new(Duration::ZERO);
        pacer.start();
        assert!(pacer.remaining().is_zero());

        let mut pacer = Pacer::new(Duration::from_secs(60));
        pacer.start();
        assert!(pacer.remaining() > Duration::from_secs(59));
    }
}
