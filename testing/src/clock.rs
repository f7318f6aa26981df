//! Deterministic clock for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};
use turnout_core::Clock;

/// A clock that only moves when the test says so.
///
/// Lets tests cross the cancellation cutoff or an event's start time
/// without sleeping.
#[derive(Clone, Debug)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    /// Create a clock pinned to the given instant.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Create a clock pinned to the real current time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap();
        *now = *now + by;
    }

    /// Pin the clock to a specific instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_time_for_all_clones() {
        let clock = FixedClock::now();
        let other = clock.clone();
        let before = clock.now();
        clock.advance(Duration::hours(2));
        assert_eq!(other.now(), before + Duration::hours(2));
    }
}
