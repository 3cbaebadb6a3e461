//! Day-boundary detection.

use chrono::{DateTime, Days, NaiveDate, TimeZone};

/// Remembers the calendar date of the last boundary check.
///
/// The date is compared in whatever time zone the `now` value carries, so the
/// caller decides between local time and a fixed offset.
///
/// # Examples
///
/// ```rust
/// use chrono::{FixedOffset, TimeZone};
/// use ringlog::rotation::RotationState;
///
/// let tz = FixedOffset::east_opt(0).unwrap();
/// let mut rotation = RotationState::new(tz.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap().date_naive());
///
/// assert!(!rotation.check_boundary(tz.with_ymd_and_hms(2024, 3, 1, 23, 59, 30).unwrap()));
/// assert!(rotation.check_boundary(tz.with_ymd_and_hms(2024, 3, 2, 0, 0, 5).unwrap()));
/// assert!(!rotation.check_boundary(tz.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    last_boundary_date: NaiveDate,
}

impl RotationState {
    /// Starts tracking from `today`; no boundary fires until the date moves on.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            last_boundary_date: today,
        }
    }

    /// Returns true if `now` falls on a later date than the last check.
    ///
    /// The stored date becomes `now`'s date on every call, so a clock that
    /// steps backwards and forwards again across midnight fires a second
    /// time for the same date.
    pub fn check_boundary<Tz: TimeZone>(&mut self, now: DateTime<Tz>) -> bool {
        let today = now.date_naive();
        let crossed = today > self.last_boundary_date;
        self.last_boundary_date = today;
        crossed
    }

    /// The date most recently observed.
    pub fn last_boundary_date(&self) -> NaiveDate {
        self.last_boundary_date
    }

    /// The day before `now`'s date, used to label the snapshot that closes it.
    pub fn previous_day<Tz: TimeZone>(now: DateTime<Tz>) -> NaiveDate {
        let today = now.date_naive();
        today.checked_sub_days(Days::new(1)).unwrap_or(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(offset_hours: i32, y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_hours * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_same_day_never_fires() {
        let mut rotation = RotationState::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        for hour in 0..24 {
            assert!(!rotation.check_boundary(at(0, 2024, 5, 10, hour)));
        }
    }

    #[test]
    fn test_fires_once_per_date() {
        let mut rotation = RotationState::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        let fired: Vec<bool> = [
            at(0, 2024, 5, 10, 23),
            at(0, 2024, 5, 11, 0),
            at(0, 2024, 5, 11, 1),
            at(0, 2024, 5, 11, 23),
            at(0, 2024, 5, 12, 0),
        ]
        .into_iter()
        .map(|now| rotation.check_boundary(now))
        .collect();
        assert_eq!(fired, vec![false, true, false, false, true]);
    }

    #[test]
    fn test_skipped_days_fire_once() {
        let mut rotation = RotationState::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert!(rotation.check_boundary(at(0, 2024, 5, 14, 8)));
        assert!(!rotation.check_boundary(at(0, 2024, 5, 14, 9)));
        assert_eq!(
            rotation.last_boundary_date(),
            NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()
        );
    }

    #[test]
    fn test_earlier_date_updates_without_firing() {
        let mut rotation = RotationState::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert!(!rotation.check_boundary(at(0, 2024, 5, 9, 12)));
        assert_eq!(
            rotation.last_boundary_date(),
            NaiveDate::from_ymd_opt(2024, 5, 9).unwrap()
        );
        assert!(rotation.check_boundary(at(0, 2024, 5, 10, 0)));
    }

    #[test]
    fn test_offset_decides_the_date() {
        // 2024-05-10 23:00 at UTC-2 is 2024-05-11 01:00 UTC
        let mut rotation = RotationState::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert!(!rotation.check_boundary(at(-2, 2024, 5, 10, 23)));
        assert!(rotation.check_boundary(at(-2, 2024, 5, 10, 23).with_timezone(&chrono::Utc)));
    }

    #[test]
    fn test_previous_day_label() {
        assert_eq!(
            RotationState::previous_day(at(0, 2024, 3, 1, 0)),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
