//! Sample batches: one poll's worth of readings.

use std::collections::BTreeMap;

use crate::error::BatchError;

/// An immutable, timestamped set of readings from one poll.
///
/// Sources absent from the batch are treated as unknown for that tick. NaN
/// readings are allowed and also mean unknown.
///
/// # Examples
///
/// ```rust
/// use ringlog::sample::SampleBatch;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let batch = SampleBatch::builder(1_700_000_000)
///     .value("ch1PowerLevel", 2.4)
///     .value("ch1Snr", 38.6)
///     .build()?;
/// assert_eq!(batch.get("ch1Snr"), Some(38.6));
/// assert_eq!(batch.get("ch2Snr"), None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    timestamp: u64,
    values: BTreeMap<String, f64>,
}

impl SampleBatch {
    /// Creates a validated batch from a timestamp and readings.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] if the timestamp is zero or a source name is
    /// empty.
    pub fn new<I, K>(timestamp: u64, values: I) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        if timestamp == 0 {
            return Err(BatchError::ZeroTimestamp);
        }

        let values: BTreeMap<String, f64> =
            values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if values.keys().any(String::is_empty) {
            return Err(BatchError::EmptySourceName);
        }

        Ok(Self { timestamp, values })
    }

    /// Starts a batch builder for `timestamp`.
    pub fn builder(timestamp: u64) -> SampleBatchBuilder {
        SampleBatchBuilder {
            timestamp,
            values: Vec::new(),
        }
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Reading for `source`, if present.
    pub fn get(&self, source: &str) -> Option<f64> {
        self.values.get(source).copied()
    }

    /// Iterates over `(source, reading)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of readings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the batch carries no readings.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Incremental builder for [`SampleBatch`].
#[derive(Debug, Clone)]
pub struct SampleBatchBuilder {
    timestamp: u64,
    values: Vec<(String, f64)>,
}

impl SampleBatchBuilder {
    /// Adds a reading. A later reading for the same source replaces an earlier one.
    #[must_use]
    pub fn value(mut self, source: impl Into<String>, value: f64) -> Self {
        self.values.push((source.into(), value));
        self
    }

    /// Adds a reading in place.
    pub fn push(&mut self, source: impl Into<String>, value: f64) {
        self.values.push((source.into(), value));
    }

    /// Validates and builds the batch.
    ///
    /// # Errors
    ///
    /// See [`SampleBatch::new`].
    pub fn build(self) -> Result<SampleBatch, BatchError> {
        SampleBatch::new(self.timestamp, self.values)
    }
}
