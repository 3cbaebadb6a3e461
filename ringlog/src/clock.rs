//! Wall-clock sources for the sampling driver.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, FixedOffset, Local, TimeDelta, Utc};

/// Supplies the current wall-clock time.
///
/// The offset of the returned value decides which calendar date the rotation
/// check sees.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<FixedOffset>;

    /// The current time as seconds since the Unix epoch.
    fn unix_seconds(&self) -> u64 {
        u64::try_from(self.now().timestamp()).unwrap_or(0)
    }
}

/// The system clock, in local time or a fixed UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    /// Uses the host's local time zone.
    pub fn local() -> Self {
        Self { offset: None }
    }

    /// Uses a fixed offset from UTC regardless of the host's time zone.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            offset: Some(offset),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        }
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```rust
/// use chrono::{DateTime, TimeDelta};
/// use ringlog::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(DateTime::parse_from_rfc3339("2024-03-01T23:59:58Z").unwrap());
/// clock.advance(TimeDelta::seconds(5));
/// assert_eq!(clock.now().to_rfc3339(), "2024-03-02T00:00:03+00:00");
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jumps to `now`.
    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Moves forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
