//! Time source for day keys and timestamps.
//!
//! Everything that needs "now" goes through a [`Clock`] so tests can pin it
//! with [`FixedClock`].

use crate::model::{DayKey, Millis};
use std::sync::{Arc, Mutex};
use time::{OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync {
    /// Current instant in the device's local offset.
    fn now(&self) -> OffsetDateTime;

    fn now_millis(&self) -> Millis {
        (self.now().unix_timestamp_nanos() / 1_000_000) as Millis
    }

    fn today(&self) -> DayKey {
        DayKey::new(self.now().date())
    }

    fn offset(&self) -> UtcOffset {
        self.now().offset()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        OffsetDateTime::now_utc().to_offset(offset)
    }
}

/// A clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: time::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FixedClock};
    use time::macros::datetime;

    #[test]
    fn fixed_clock_reports_local_day_and_millis() {
        let clock = FixedClock::new(datetime!(2024-06-03 23:30 +02:00));
        assert_eq!(clock.today().to_string(), "2024-06-03");
        assert_eq!(clock.now_millis(), 1_717_450_200_000);
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(datetime!(2024-06-03 23:30 UTC));
        clock.advance(time::Duration::hours(1));
        assert_eq!(clock.today().to_string(), "2024-06-04");
    }
}
