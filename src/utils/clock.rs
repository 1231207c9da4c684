use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Injected time source. Production code uses [`SystemClock`]; tests use
/// [`FixedClock`] so manifests and reports are byte-stable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to an instant, advanced explicitly.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FixedClock {
            now: Mutex::new(now),
        }
    }

    /// Fixed instant used throughout the test suite.
    pub fn epoch_2024() -> Self {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2024-01-15T14:30:52Z")
                .expect("valid fixture timestamp")
                .with_timezone(&Utc),
        )
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}
