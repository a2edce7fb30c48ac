//! Injectable time and randomness.
//!
//! Every component that computes a delay, a lease expiry or a jittered sleep
//! goes through these traits instead of calling `Utc::now()` or `rand`
//! directly, so tests can freeze time and fix the jitter.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Monotonic-enough wall clock for scheduling decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Source of uniform randomness for jittered delays.
pub trait Jitter: Send + Sync {
    /// A sample in `[lo, hi)`.
    fn uniform(&self, lo: f64, hi: f64) -> f64;
}

pub type SharedJitter = Arc<dyn Jitter>;

/// Production jitter backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadJitter;

impl Jitter for ThreadJitter {
    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        if lo >= hi {
            return lo;
        }
        rand::thread_rng().gen_range(lo..hi)
    }
}

/// Test jitter that always returns the same offset, clamped into range.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn uniform(&self, lo: f64, hi: f64) -> f64 {
        self.0.clamp(lo, hi)
    }
}
