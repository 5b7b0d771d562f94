use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Time source used by validators, writers, and stores.
///
/// The system clock in production; a manual clock in scenario tests where
/// temporal boundaries are asserted to the second.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock starting at `secs` seconds past the Unix epoch.
    pub fn at_epoch_seconds(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn set_epoch_seconds(&self, secs: i64) {
        self.set(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC));
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_epoch_seconds(1000);
        assert_eq!(clock.now().timestamp(), 1000);
        clock.advance(Duration::seconds(200));
        assert_eq!(clock.now().timestamp(), 1200);
        clock.set_epoch_seconds(1601);
        assert_eq!(clock.now().timestamp(), 1601);
    }
}
