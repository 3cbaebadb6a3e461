//! Step-bucket consolidation.
//!
//! An update at time `t` covers the interval `(last_update, t]`. Buckets are
//! aligned to multiples of the step since the Unix epoch and bucket `e` covers
//! `(e - step, e]`. Every bucket the interval touches folds the update's value
//! with the consolidation function:
//!
//! ```text
//!  last_update                         t
//!      |-------------------------------|
//!   ...(   e1   ](   e2   ](   e3   ](  open  ]
//!      pending      closed    closed    pending
//! ```
//!
//! Buckets ending at or before `t` are closed and appended to the archive's
//! ring. The bucket containing `t` (when `t` is not itself a boundary) stays
//! open and keeps a pending value that later updates fold into.

use crate::ring::RingBuffer;
use crate::schema::ConsolidationFn;

/// The buckets closed by one update, shared by every archive of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpan {
    /// End timestamp of the first bucket to close.
    pub first_close: u64,
    /// Number of buckets to close.
    pub closed: usize,
    /// True when more buckets elapsed than the archive can hold, so the
    /// oldest elapsed ones (including any pending bucket) are skipped.
    pub truncated: bool,
    /// True when `t` falls strictly inside a bucket that stays open.
    pub leaves_open: bool,
}

impl BucketSpan {
    /// Computes which buckets the interval `(prev, now]` closes.
    ///
    /// `now` must be greater than `prev`, `step` and `capacity` non-zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ringlog::consolidate::BucketSpan;
    ///
    /// // (3, 17] with 5 second buckets closes 5, 10 and 15 and leaves 20 open
    /// let span = BucketSpan::between(3, 17, 5, 100);
    /// assert_eq!(span.first_close, 5);
    /// assert_eq!(span.closed, 3);
    /// assert!(span.leaves_open);
    /// ```
    pub fn between(prev: u64, now: u64, step: u64, capacity: usize) -> Self {
        debug_assert!(now > prev, "update must move time forward");
        debug_assert!(step > 0 && capacity > 0);

        let first_close = (prev / step + 1) * step;
        if now < first_close {
            return Self {
                first_close,
                closed: 0,
                truncated: false,
                leaves_open: true,
            };
        }

        let last_close = now / step * step;
        let leaves_open = now > last_close;
        let elapsed = (last_close - first_close) / step + 1;

        let capacity_u64 = capacity as u64;
        if elapsed > capacity_u64 {
            return Self {
                first_close: last_close - (capacity_u64 - 1) * step,
                closed: capacity,
                truncated: true,
                leaves_open,
            };
        }

        #[allow(clippy::cast_possible_truncation)] // elapsed <= capacity here
        Self {
            first_close,
            closed: elapsed as usize,
            truncated: false,
            leaves_open,
        }
    }

    /// End timestamps of the closed buckets, oldest first.
    pub fn close_times(&self, step: u64) -> impl Iterator<Item = u64> + use<> {
        let first = self.first_close;
        (0..self.closed as u64).map(move |i| first + i * step)
    }
}

/// One data source's history: closed rows plus the open bucket's pending value.
#[derive(Debug, Clone)]
pub struct Archive {
    ring: RingBuffer,
    /// Folded value of the open bucket; NaN when nothing known was seen.
    pending: f64,
    consolidation_fn: ConsolidationFn,
}

impl Archive {
    /// Creates an empty archive holding `capacity` rows.
    pub fn new(capacity: usize, consolidation_fn: ConsolidationFn) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            pending: f64::NAN,
            consolidation_fn,
        }
    }

    /// Rebuilds an archive from persisted rows and pending value.
    pub fn restore<I>(
        capacity: usize,
        consolidation_fn: ConsolidationFn,
        rows: I,
        pending: f64,
    ) -> Self
    where
        I: IntoIterator<Item = (u64, f64)>,
    {
        Self {
            ring: RingBuffer::from_rows(capacity, rows),
            pending,
            consolidation_fn,
        }
    }

    /// Folds one update into the archive.
    ///
    /// `value` is the update's reading for this source, NaN when unknown
    /// (missing, out of range or past the heartbeat).
    pub fn apply(&mut self, span: &BucketSpan, step: u64, value: f64) {
        let cf = self.consolidation_fn;

        if span.closed == 0 {
            self.pending = cf.fold(self.pending, value);
            return;
        }

        let mut carried = if span.truncated {
            f64::NAN
        } else {
            self.pending
        };
        for close_time in span.close_times(step) {
            self.ring.push(close_time, cf.fold(carried, value));
            carried = f64::NAN;
        }

        self.pending = if span.leaves_open {
            cf.fold(f64::NAN, value)
        } else {
            f64::NAN
        };
    }

    /// Closed rows, oldest first. NaN means unknown.
    pub fn rows(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.ring.iter()
    }

    /// The open bucket's folded value, NaN if nothing known was seen yet.
    pub fn pending(&self) -> f64 {
        self.pending
    }

    /// Number of closed rows held.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True if no bucket has closed yet.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Maximum number of rows.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// The underlying ring.
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}
