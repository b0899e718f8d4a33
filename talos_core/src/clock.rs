// talos_core/src/clock.rs

//! One monotonic clock per run. Every timestamp in the system (state samples,
//! camera captures, teleop samples, episode framing) is an f64 in seconds on
//! this clock, so cross-modal skew is measurable regardless of backend.

use std::sync::{Arc, Mutex};
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Seconds since the clock's origin. Monotonic, never jumps backwards.
    fn now(&self) -> f64;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall-time-backed monotonic clock anchored at construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests. Clones share the same time source.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(t: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(t)),
        }
    }

    pub fn advance(&self, dt: f64) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += dt;
    }

    pub fn set(&self, t: f64) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}
