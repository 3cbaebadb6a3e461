//! Point-in-time copies of store contents.
//!
//! A [`Snapshot`] is detached from the store: exporters and renderers work on
//! it without holding any lock.

use serde::{Deserialize, Serialize};

/// A copy of every archive at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Seconds covered by one row.
    pub step: u64,
    /// Timestamp of the most recently accepted batch.
    pub last_update: u64,
    /// One entry per data source, in configuration order.
    pub series: Vec<SeriesSnapshot>,
}

/// Rows of one data source, oldest first. `None` marks an unknown row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    /// Data source name.
    pub name: String,
    /// `(bucket end timestamp, value)` rows.
    pub rows: Vec<(u64, Option<f64>)>,
}

impl Snapshot {
    /// Looks up a series by source name.
    pub fn series(&self, name: &str) -> Option<&SeriesSnapshot> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Restricts every series to rows newer than `last_update - secs`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ringlog::snapshot::{SeriesSnapshot, Snapshot};
    ///
    /// let snapshot = Snapshot {
    ///     step: 5,
    ///     last_update: 20,
    ///     series: vec![SeriesSnapshot {
    ///         name: "ch1Snr".into(),
    ///         rows: vec![(10, Some(1.0)), (15, None), (20, Some(3.0))],
    ///     }],
    /// };
    /// let recent = snapshot.window(5);
    /// assert_eq!(recent.series[0].rows, vec![(20, Some(3.0))]);
    /// ```
    #[must_use]
    pub fn window(&self, secs: u64) -> Self {
        let cutoff = self.last_update.saturating_sub(secs);
        Self {
            step: self.step,
            last_update: self.last_update,
            series: self
                .series
                .iter()
                .map(|s| SeriesSnapshot {
                    name: s.name.clone(),
                    rows: s.rows.iter().copied().filter(|(ts, _)| *ts > cutoff).collect(),
                })
                .collect(),
        }
    }

    /// Oldest and newest row timestamps across all series.
    pub fn time_range(&self) -> Option<(u64, u64)> {
        let mut timestamps = self.series.iter().flat_map(|s| s.rows.iter().map(|(ts, _)| *ts));
        let first = timestamps.next()?;
        Some(timestamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts))))
    }

    /// True if no series holds any row.
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.rows.is_empty())
    }
}

impl SeriesSnapshot {
    /// Iterates over known rows only.
    pub fn known(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.rows.iter().filter_map(|(ts, v)| v.map(|v| (*ts, v)))
    }

    /// Number of known rows.
    pub fn known_count(&self) -> usize {
        self.known().count()
    }

    /// Smallest and largest known values.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.known().fold(None, |range, (_, v)| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            step: 5,
            last_update: 25,
            series: vec![
                SeriesSnapshot {
                    name: "a".into(),
                    rows: vec![(10, Some(3.0)), (15, None), (20, Some(9.0)), (25, Some(4.0))],
                },
                SeriesSnapshot {
                    name: "b".into(),
                    rows: vec![(10, None), (15, None), (20, None), (25, None)],
                },
            ],
        }
    }

    #[test]
    fn test_series_lookup() {
        let snap = snapshot();
        assert_eq!(snap.series("a").map(|s| s.rows.len()), Some(4));
        assert!(snap.series("c").is_none());
    }

    #[test]
    fn test_known_and_range() {
        let snap = snapshot();
        let a = snap.series("a").unwrap();
        assert_eq!(a.known_count(), 3);
        assert_eq!(a.value_range(), Some((3.0, 9.0)));
        assert_eq!(snap.series("b").unwrap().value_range(), None);
    }

    #[test]
    fn test_window_and_time_range() {
        let snap = snapshot();
        let recent = snap.window(10);
        assert_eq!(recent.series[0].rows, vec![(20, Some(9.0)), (25, Some(4.0))]);
        assert_eq!(recent.time_range(), Some((20, 25)));
        assert_eq!(snap.window(0).time_range(), None);
        assert!(snap.window(0).is_empty());
    }

    #[test]
    fn test_serializes_unknown_as_null() {
        let snap = snapshot().window(10);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["series"][1]["rows"][0], serde_json::json!([20, null]));
        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }
}
