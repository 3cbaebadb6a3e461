//! Store configuration types.
//!
//! A [`StoreConfig`] fixes the step, the retention and the set of data sources
//! for the lifetime of a store. It is validated once at initialization and
//! never changes afterwards.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Maximum number of rows allowed in any single archive.
///
/// Guards against a misconfigured step/retention pair allocating gigabytes.
pub const MAX_ROWS_PER_ARCHIVE: u64 = 1_000_000;

/// The kind of a data source.
///
/// Only gauges are supported: each reading is an instantaneous value, stored
/// as-is rather than differentiated like a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Instantaneous value.
    #[default]
    Gauge,
}

/// Aggregation rule used to fold the raw readings of one step into a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationFn {
    /// Largest known reading observed for the bucket.
    #[default]
    Max,
}

impl ConsolidationFn {
    /// Folds `value` into the running accumulator `acc`.
    ///
    /// NaN stands for "no known value yet" on either side, so folding into a
    /// NaN accumulator yields `value` and folding NaN leaves `acc` unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ringlog::schema::ConsolidationFn;
    ///
    /// let acc = ConsolidationFn::Max.fold(f64::NAN, 5.0);
    /// assert_eq!(ConsolidationFn::Max.fold(acc, 9.0), 9.0);
    /// assert_eq!(ConsolidationFn::Max.fold(9.0, f64::NAN), 9.0);
    /// ```
    #[inline]
    pub fn fold(self, acc: f64, value: f64) -> f64 {
        if value.is_nan() {
            return acc;
        }
        if acc.is_nan() {
            return value;
        }
        match self {
            Self::Max => acc.max(value),
        }
    }
}

/// Static description of one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Unique source name (e.g. `ch1Snr`).
    pub name: String,

    /// Source kind.
    #[serde(default)]
    pub kind: SourceKind,

    /// Smallest valid reading, inclusive. Must be finite.
    pub min: f64,

    /// Largest valid reading, inclusive. Must be finite.
    pub max: f64,

    /// Longest gap in seconds between updates before the source is unknown.
    pub heartbeat: u64,
}

impl DataSourceSpec {
    /// Creates a gauge source.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ringlog::schema::DataSourceSpec;
    ///
    /// let snr = DataSourceSpec::gauge("ch1Snr", 0.0, 50.0, 600);
    /// assert!(snr.accepts(38.5));
    /// assert!(!snr.accepts(51.0));
    /// ```
    pub fn gauge(name: impl Into<String>, min: f64, max: f64, heartbeat: u64) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Gauge,
            min,
            max,
            heartbeat,
        }
    }

    /// Returns true if `value` is a known reading inside `[min, max]`.
    #[inline]
    pub fn accepts(&self, value: f64) -> bool {
        !value.is_nan() && value >= self.min && value <= self.max
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptySourceName);
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(ConfigError::InvalidRange {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
            });
        }
        if self.heartbeat == 0 {
            return Err(ConfigError::ZeroHeartbeat {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Configuration of a [`Store`](crate::store::Store).
///
/// # Example
///
/// ```rust
/// use ringlog::schema::{DataSourceSpec, StoreConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // 5 minute rows kept for one day
/// let config = StoreConfig::new(300, 86_400, vec![
///     DataSourceSpec::gauge("ch1PowerLevel", -15.0, 15.0, 600),
///     DataSourceSpec::gauge("ch1Snr", 0.0, 50.0, 600),
/// ])?;
/// assert_eq!(config.capacity(), 288);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seconds covered by one archive row.
    pub step_secs: u64,

    /// Seconds covered by the whole archive.
    pub retention_secs: u64,

    /// Consolidation function applied to every source.
    #[serde(default)]
    pub consolidation_fn: ConsolidationFn,

    /// Data sources, in archive order.
    pub sources: Vec<DataSourceSpec>,
}

impl StoreConfig {
    /// Creates and validates a configuration using MAX consolidation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid; see
    /// [`StoreConfig::validate`].
    pub fn new(
        step_secs: u64,
        retention_secs: u64,
        sources: Vec<DataSourceSpec>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            step_secs,
            retention_secs,
            consolidation_fn: ConsolidationFn::Max,
            sources,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when:
    /// - the step is zero
    /// - retention is not a positive multiple of the step
    /// - the capacity exceeds [`MAX_ROWS_PER_ARCHIVE`]
    /// - there are no sources, or a source is empty, duplicated, has a
    ///   malformed range or a zero heartbeat
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_secs == 0 {
            return Err(ConfigError::ZeroStep);
        }

        if self.retention_secs == 0 || self.retention_secs % self.step_secs != 0 {
            return Err(ConfigError::RetentionNotMultiple {
                retention: self.retention_secs,
                step: self.step_secs,
            });
        }

        let capacity = self.retention_secs / self.step_secs;
        if capacity > MAX_ROWS_PER_ARCHIVE {
            return Err(ConfigError::TooManyRows {
                capacity,
                max_rows: MAX_ROWS_PER_ARCHIVE,
            });
        }

        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut seen = HashSet::with_capacity(self.sources.len());
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource {
                    name: source.name.clone(),
                });
            }
            if source.heartbeat < self.step_secs {
                warn!(
                    source = %source.name,
                    heartbeat = source.heartbeat,
                    step = self.step_secs,
                    "updates spaced further apart than the heartbeat will be recorded unknown"
                );
            }
        }

        Ok(())
    }

    /// Number of rows each archive holds.
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_ROWS_PER_ARCHIVE once validated
    pub fn capacity(&self) -> usize {
        if self.step_secs == 0 {
            return 0;
        }
        (self.retention_secs / self.step_secs) as usize
    }

    /// Returns the index of the source called `name`.
    pub fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == name)
    }

    /// Computes a hash of everything that shapes the stored archives.
    ///
    /// Persisted state records this hash; a mismatch on restore means the
    /// definition changed and the old rows cannot be reused.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.step_secs.hash(&mut hasher);
        self.retention_secs.hash(&mut hasher);
        self.consolidation_fn.hash(&mut hasher);
        for source in &self.sources {
            source.name.hash(&mut hasher);
            source.kind.hash(&mut hasher);
            source.min.to_bits().hash(&mut hasher);
            source.max.to_bits().hash(&mut hasher);
            source.heartbeat.hash(&mut hasher);
        }

        hasher.finish()
    }
}
