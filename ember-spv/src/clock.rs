//! Injectable time source.
//!
//! Rate limits, ping RTT, cache expiry and throttles all read time
//! through this trait so tests can drive them deterministically.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Seconds since the Unix epoch.
    fn unix_time(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
    }
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct MockClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
    unix_base: u64,
}

impl MockClock {
    /// A mock clock starting at the current instant.
    pub fn new() -> Self {
        MockClock {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            unix_base: 1_700_000_000,
        }
    }

    /// Advance the clock.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().expect("clock mutex");
        *offset += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().expect("clock mutex")
    }

    fn unix_time(&self) -> u64 {
        self.unix_base + self.offset.lock().expect("clock mutex").as_secs()
    }
}
