//! Store module: the top-level round-robin series store.
//!
//! The Store ties a validated [`StoreConfig`] to one [`Archive`] per data
//! source and serializes every mutation behind a single lock.
//!
//! # Design
//!
//! - Archives are allocated once at initialization; memory use is
//!   `sources x capacity` rows for the whole life of the store
//! - `ingest` validates and range-checks outside the lock, then mutates the
//!   archives inside it
//! - A rejected batch leaves the store untouched
//! - `snapshot` copies every archive under the same lock
//!
//! # Example Usage
//!
//! ```rust
//! use ringlog::sample::SampleBatch;
//! use ringlog::schema::{DataSourceSpec, StoreConfig};
//! use ringlog::store::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::new(5, 20, vec![
//!     DataSourceSpec::gauge("ch1Snr", 0.0, 50.0, 10),
//! ])?;
//! let store = Store::initialize_at(config, 0, 100)?;
//!
//! store.ingest(&SampleBatch::builder(5).value("ch1Snr", 38.5).build()?)?;
//!
//! let snapshot = store.snapshot();
//! assert_eq!(snapshot.series[0].rows, vec![(5, Some(38.5))]);
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::consolidate::{Archive, BucketSpan};
use crate::error::{ConfigError, IngestError, OutOfOrderError};
use crate::sample::SampleBatch;
use crate::schema::StoreConfig;
use crate::snapshot::{SeriesSnapshot, Snapshot};

/// Round-robin store holding one fixed-size archive per data source.
///
/// # Thread Safety
///
/// All methods take `&self`; the store can be shared behind an `Arc` between
/// the sampling driver and checkpointing code.
#[derive(Debug)]
pub struct Store {
    /// Immutable store definition.
    config: StoreConfig,
    /// Mutable state guarded by one lock.
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
pub(crate) struct StoreInner {
    /// Timestamp of the last accepted batch, or the start time.
    pub(crate) last_update: u64,
    /// Archives in source order.
    pub(crate) archives: Vec<Archive>,
}

impl Store {
    /// Creates an empty store whose history starts at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or
    /// `start_time` is not strictly before the current time.
    pub fn initialize(config: StoreConfig, start_time: u64) -> Result<Self, ConfigError> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        Self::initialize_at(config, start_time, now)
    }

    /// Like [`Store::initialize`] with the creation time supplied by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or
    /// `start_time >= now`.
    pub fn initialize_at(
        config: StoreConfig,
        start_time: u64,
        now: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if start_time >= now {
            return Err(ConfigError::StartNotPast {
                start: start_time,
                now,
            });
        }

        let capacity = config.capacity();
        let archives = config
            .sources
            .iter()
            .map(|_| Archive::new(capacity, config.consolidation_fn))
            .collect();

        debug!(
            sources = config.sources.len(),
            capacity,
            step = config.step_secs,
            start_time,
            "initialized store"
        );

        Ok(Self::from_parts(config, start_time, archives))
    }

    /// Assembles a store from already validated parts.
    pub(crate) fn from_parts(config: StoreConfig, last_update: u64, archives: Vec<Archive>) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner {
                last_update,
                archives,
            }),
        }
    }

    /// Ingests one batch.
    ///
    /// Missing, NaN and out-of-range readings are unknown for this update.
    /// If the gap since the last update exceeds a source's heartbeat the
    /// update is unknown for that source. Readings for names that match no
    /// configured source are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::OutOfOrder`] if the batch timestamp is not
    /// strictly after the last accepted one. The store is left unchanged.
    pub fn ingest(&self, batch: &SampleBatch) -> Result<(), IngestError> {
        let timestamp = batch.timestamp();

        for (name, _) in batch.iter() {
            if self.config.source_index(name).is_none() {
                warn!(source = name, timestamp, "ignoring reading for unknown source");
            }
        }

        let readings: Vec<f64> = self
            .config
            .sources
            .iter()
            .map(|spec| match batch.get(&spec.name) {
                Some(value) if spec.accepts(value) => value,
                Some(value) if !value.is_nan() => {
                    warn!(
                        source = %spec.name,
                        value,
                        min = spec.min,
                        max = spec.max,
                        timestamp,
                        "reading outside valid range, recording unknown"
                    );
                    f64::NAN
                }
                _ => f64::NAN,
            })
            .collect();

        let step = self.config.step_secs;
        let mut inner = self.lock();

        if timestamp <= inner.last_update {
            return Err(OutOfOrderError {
                timestamp,
                last_update: inner.last_update,
            }
            .into());
        }

        let gap = timestamp - inner.last_update;
        let span = BucketSpan::between(inner.last_update, timestamp, step, self.capacity());
        if span.truncated {
            debug!(gap, timestamp, "update gap exceeds retention, older buckets skipped");
        }

        for ((archive, spec), value) in inner
            .archives
            .iter_mut()
            .zip(&self.config.sources)
            .zip(readings)
        {
            let value = if gap > spec.heartbeat { f64::NAN } else { value };
            archive.apply(&span, step, value);
        }
        inner.last_update = timestamp;

        Ok(())
    }

    /// Copies all archives.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            step: self.config.step_secs,
            last_update: inner.last_update,
            series: self
                .config
                .sources
                .iter()
                .zip(&inner.archives)
                .map(|(spec, archive)| SeriesSnapshot {
                    name: spec.name.clone(),
                    rows: archive
                        .rows()
                        .map(|(ts, v)| (ts, if v.is_nan() { None } else { Some(v) }))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Returns the store definition.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rows per archive.
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Timestamp of the last accepted batch, or the start time.
    pub fn last_update_time(&self) -> u64 {
        self.lock().last_update
    }

    /// Source names in archive order.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.config.sources.iter().map(|s| s.name.as_str())
    }

    /// Runs `f` with the locked state.
    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&StoreInner) -> R) -> R {
        f(&self.lock())
    }

    // State is only written after validation, so a panic while holding the
    // lock cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataSourceSpec;

    fn store(heartbeat: u64) -> Store {
        let config = StoreConfig::new(
            5,
            20,
            vec![
                DataSourceSpec::gauge("power", -15.0, 15.0, heartbeat),
                DataSourceSpec::gauge("snr", 0.0, 50.0, heartbeat),
            ],
        )
        .unwrap();
        Store::initialize_at(config, 0, 1_000).unwrap()
    }

    fn batch(ts: u64, values: &[(&str, f64)]) -> SampleBatch {
        SampleBatch::new(ts, values.iter().map(|(k, v)| (*k, *v))).unwrap()
    }

    #[test]
    fn test_start_must_be_in_the_past() {
        let config =
            StoreConfig::new(5, 20, vec![DataSourceSpec::gauge("a", 0.0, 1.0, 10)]).unwrap();
        assert_eq!(
            Store::initialize_at(config.clone(), 100, 100).unwrap_err(),
            ConfigError::StartNotPast { start: 100, now: 100 }
        );
        assert!(Store::initialize(config, 0).is_ok());
    }

    #[test]
    fn test_empty_store_snapshot() {
        let store = store(10);
        let snap = store.snapshot();
        assert_eq!(snap.last_update, 0);
        assert_eq!(snap.series.len(), 2);
        assert!(snap.is_empty());
        assert_eq!(store.source_names().collect::<Vec<_>>(), vec!["power", "snr"]);
        assert_eq!(store.capacity(), 4);
    }

    #[test]
    fn test_out_of_order_leaves_store_untouched() {
        let store = store(10);
        store.ingest(&batch(5, &[("snr", 30.0)])).unwrap();
        let before = store.snapshot();

        let err = store.ingest(&batch(5, &[("snr", 40.0)])).unwrap_err();
        assert_eq!(
            err,
            IngestError::OutOfOrder(OutOfOrderError {
                timestamp: 5,
                last_update: 5
            })
        );
        assert!(store.ingest(&batch(3, &[("snr", 40.0)])).is_err());
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.last_update_time(), 5);
    }

    #[test]
    fn test_out_of_range_is_unknown() {
        let store = store(10);
        store
            .ingest(&batch(5, &[("power", 99.0), ("snr", 30.0)]))
            .unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.series("power").unwrap().rows, vec![(5, None)]);
        assert_eq!(snap.series("snr").unwrap().rows, vec![(5, Some(30.0))]);
    }

    #[test]
    fn test_unknown_source_names_ignored() {
        let store = store(10);
        store
            .ingest(&batch(5, &[("bogus", 1.0), ("snr", 30.0)]))
            .unwrap();
        assert_eq!(store.snapshot().series.len(), 2);
        assert_eq!(store.last_update_time(), 5);
    }

    #[test]
    fn test_empty_batch_advances_time() {
        let store = store(10);
        store.ingest(&batch(5, &[])).unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.last_update, 5);
        assert!(snap.series.iter().all(|s| s.rows == vec![(5, None)]));
    }

    #[test]
    fn test_heartbeat_gap_is_unknown() {
        let store = store(10);
        store.ingest(&batch(5, &[("snr", 30.0)])).unwrap();
        // 25 seconds since the last update with a 10 second heartbeat
        store.ingest(&batch(30, &[("snr", 31.0)])).unwrap();
        let rows = store.snapshot().series("snr").unwrap().rows.clone();
        assert_eq!(rows, vec![(15, None), (20, None), (25, None), (30, None)]);
    }
}
