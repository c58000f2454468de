// Elapsed-time sources for timeouts
//
// `StdTimer` follows the wall clock. `ManualTimer` reads a shared `SimClock`
// that the simulation (or a test) advances explicitly.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic stopwatch
pub trait Timer {
    /// Start (or restart) counting from zero
    fn start(&mut self);

    /// Time since `start`; zero if never started
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Default)]
pub struct StdTimer {
    started_at: Option<Instant>,
}

impl StdTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Timer for StdTimer {
    fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }
}

/// Simulated time shared between a loop and the timers reading it
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<Duration>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn advance(&self, dt: Duration) {
        self.now.set(self.now.get() + dt);
    }

    /// A timer reading this clock
    pub fn timer(&self) -> ManualTimer {
        ManualTimer {
            clock: self.clone(),
            started_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManualTimer {
    clock: SimClock,
    started_at: Option<Duration>,
}

impl Timer for ManualTimer {
    fn start(&mut self) {
        self.started_at = Some(self.clock.now());
    }

    fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(start) => self.clock.now().saturating_sub(start),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_timer_counts_from_start() {
        let clock = SimClock::new();
        let mut timer = clock.timer();
        clock.advance(Duration::from_secs(3));
        assert_eq!(timer.elapsed(), Duration::ZERO);

        timer.start();
        clock.advance(Duration::from_millis(250));
        assert_eq!(timer.elapsed(), Duration::from_millis(250));

        // Restart re-references to the current clock
        timer.start();
        assert_eq!(timer.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_std_timer_is_monotonic() {
        let mut timer = StdTimer::new();
        assert_eq!(timer.elapsed(), Duration::ZERO);
        timer.start();
        let a = timer.elapsed();
        let b = timer.elapsed();
        assert!(b >= a);
    }
}
