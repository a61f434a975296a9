//! Time source shared by the calibration timers, the dwell sampler and
//! sample timestamps.
//!
//! The event-loop runtime uses `SystemClock`.  Tests drive every state
//! machine through `TestClock`, which only moves when told to.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Monotonic plus wall-clock time source.
pub trait Clock: Send + Sync {
    /// Current monotonic instant; all deadlines are expressed in this base.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since UNIX epoch, used to stamp gaze samples.
    fn unix_millis(&self) -> i64;
}

/// Milliseconds elapsed from `since` to `now`, saturating at zero.
pub fn elapsed_ms(now: Instant, since: Instant) -> u64 {
    now.saturating_duration_since(since).as_millis() as u64
}

fn system_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> i64 {
        system_unix_millis()
    }
}

/// Manually advanced clock.
pub struct TestClock {
    state: Mutex<(Instant, i64)>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((Instant::now(), system_unix_millis())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0 += duration;
        state.1 += duration.as_millis() as i64;
    }

    /// Shorthand for the 100 ms / 1 s steps the tests mostly use.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn unix_millis(&self) -> i64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}
