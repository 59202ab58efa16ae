//! Injectable time source
//!
//! Every timeout computation in this crate asks a [`Clock`] for the current
//! time instead of calling [`std::time::Instant::now`] directly. Production
//! code uses [`WallClock`]; tests use [`ManualClock`] and advance time by
//! hand.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A source of "now"
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually advanced clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Advance the clock by `d`
    pub fn add(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += d;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
