use parking_lot::Mutex;
use std::sync::Arc;

/// Wall-clock source, injected into the engine so tests can control time.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually-advanced clock for tests.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    ms: Arc<Mutex<i64>>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            ms: Arc::new(Mutex::new(start_ms)),
        }
    }

    pub fn set(&self, ms: i64) {
        *self.ms.lock() = ms;
    }

    pub fn advance(&self, delta_ms: i64) {
        *self.ms.lock() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        *self.ms.lock()
    }
}
