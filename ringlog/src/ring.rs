//! Fixed-capacity ring buffer of consolidated rows.
//!
//! Each archive in the store is one [`RingBuffer`]. Storage is allocated once
//! at construction; writing past capacity overwrites the oldest row, so the
//! memory footprint never grows with uptime.
//!
//! # Design
//!
//! - Rows are `(timestamp, value)` pairs appended in increasing timestamp order
//! - The write cursor points at the slot the next row lands in
//! - Once the cursor has gone past the last slot the ring has wrapped and the
//!   oldest row sits at the cursor
//! - NaN values mark unknown rows

/// A fixed-capacity circular buffer of `(timestamp, value)` rows.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    /// Row timestamps, indexed by slot.
    timestamps: Vec<u64>,
    /// Row values, indexed by slot. NaN means unknown.
    values: Vec<f64>,
    /// Slot the next row is written to.
    write_cursor: usize,
    /// Number of slots holding a row.
    len: usize,
}

impl RingBuffer {
    /// Creates an empty ring with room for `capacity` rows.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Store configuration validation rules
    /// this out before any ring is built.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be greater than zero");
        Self {
            timestamps: vec![0; capacity],
            values: vec![f64::NAN; capacity],
            write_cursor: 0,
            len: 0,
        }
    }

    /// Rebuilds a ring from rows ordered oldest to newest.
    ///
    /// Only the newest `capacity` rows are kept.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn from_rows<I>(capacity: usize, rows: I) -> Self
    where
        I: IntoIterator<Item = (u64, f64)>,
    {
        let mut ring = Self::new(capacity);
        for (timestamp, value) in rows {
            ring.push(timestamp, value);
        }
        ring
    }

    /// Maximum number of rows.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of rows currently held.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no row has been written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true once every slot holds a row, i.e. the next push evicts.
    #[inline]
    pub fn has_wrapped(&self) -> bool {
        self.len == self.capacity()
    }

    /// Appends a row, evicting and returning the oldest one when full.
    ///
    /// This is the hot path and performs no allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ringlog::ring::RingBuffer;
    ///
    /// let mut ring = RingBuffer::new(2);
    /// assert_eq!(ring.push(5, 1.0), None);
    /// assert_eq!(ring.push(10, 3.0), None);
    /// assert_eq!(ring.push(15, 2.0), Some((5, 1.0)));
    /// ```
    #[inline]
    pub fn push(&mut self, timestamp: u64, value: f64) -> Option<(u64, f64)> {
        let slot = self.write_cursor;
        let evicted = if self.has_wrapped() {
            Some((self.timestamps[slot], self.values[slot]))
        } else {
            self.len += 1;
            None
        };

        self.timestamps[slot] = timestamp;
        self.values[slot] = value;
        self.write_cursor = (slot + 1) % self.capacity();

        evicted
    }

    /// Slot holding the oldest row.
    #[inline]
    fn oldest_slot(&self) -> usize {
        if self.has_wrapped() {
            self.write_cursor
        } else {
            0
        }
    }

    /// Timestamp of the oldest row, which is the next to be evicted.
    pub fn oldest_timestamp(&self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        Some(self.timestamps[self.oldest_slot()])
    }

    /// Timestamp of the newest row.
    pub fn newest_timestamp(&self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        let newest = (self.write_cursor + self.capacity() - 1) % self.capacity();
        Some(self.timestamps[newest])
    }

    /// Iterates over all rows from oldest to newest, unknown rows included.
    pub fn iter(&self) -> RingIterator<'_> {
        RingIterator {
            ring: self,
            current_slot: self.oldest_slot(),
            slots_remaining: self.len,
        }
    }
}

/// Iterator over the rows of a [`RingBuffer`] in chronological order.
#[derive(Debug)]
pub struct RingIterator<'a> {
    ring: &'a RingBuffer,
    current_slot: usize,
    slots_remaining: usize,
}

impl Iterator for RingIterator<'_> {
    type Item = (u64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.slots_remaining == 0 {
            return None;
        }

        let slot = self.current_slot;
        self.current_slot = (slot + 1) % self.ring.capacity();
        self.slots_remaining -= 1;

        Some((self.ring.timestamps[slot], self.ring.values[slot]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.slots_remaining, Some(self.slots_remaining))
    }
}

impl ExactSizeIterator for RingIterator<'_> {}
