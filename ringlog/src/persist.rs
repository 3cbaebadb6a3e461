//! Saving and restoring store state between runs.
//!
//! The state file is a single JSON document holding the store definition,
//! the last update time and every archive's rows and pending bucket. Unknown
//! values are written as `null`.
//!
//! # File format
//!
//! ```text
//! {
//!   "version": 1,
//!   "definition_hash": 1234567890,
//!   "config": { "step_secs": 300, "retention_secs": 86400, ... },
//!   "last_update": 1700000000,
//!   "archives": [
//!     { "name": "ch1Snr", "rows": [[1699999800, 38.5], [1700000000, null]], "pending": null }
//!   ]
//! }
//! ```
//!
//! Writes go to a temporary file next to the target which is then renamed
//! over it, so a crash mid-write leaves the previous state intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consolidate::Archive;
use crate::error::PersistError;
use crate::schema::StoreConfig;
use crate::store::Store;

/// State file format version.
pub const STATE_VERSION: u32 = 1;

/// Serialized form of a whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Format version, [`STATE_VERSION`] when written by this crate.
    pub version: u32,
    /// [`StoreConfig::stable_hash`] of `config` at save time.
    pub definition_hash: u64,
    /// Definition the archives were built with.
    pub config: StoreConfig,
    /// Timestamp of the last accepted batch.
    pub last_update: u64,
    /// One entry per source, in configuration order.
    pub archives: Vec<ArchiveState>,
}

/// Serialized form of one archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveState {
    /// Source name.
    pub name: String,
    /// Closed rows, oldest first.
    pub rows: Vec<(u64, Option<f64>)>,
    /// Value of the open bucket.
    pub pending: Option<f64>,
}

fn known(value: f64) -> Option<f64> {
    if value.is_nan() { None } else { Some(value) }
}

impl StoreState {
    /// Captures the current state of `store`.
    pub fn capture(store: &Store) -> Self {
        let config = store.config().clone();
        store.with_inner(|inner| Self {
            version: STATE_VERSION,
            definition_hash: config.stable_hash(),
            last_update: inner.last_update,
            archives: config
                .sources
                .iter()
                .zip(&inner.archives)
                .map(|(spec, archive)| ArchiveState {
                    name: spec.name.clone(),
                    rows: archive.rows().map(|(ts, v)| (ts, known(v))).collect(),
                    pending: known(archive.pending()),
                })
                .collect(),
            config,
        })
    }

    /// Checks the state is internally consistent.
    fn check(&self) -> Result<(), String> {
        if self.version != STATE_VERSION {
            return Err(format!("unsupported version {}", self.version));
        }
        self.config.validate().map_err(|e| e.to_string())?;
        if self.archives.len() != self.config.sources.len() {
            return Err(format!(
                "{} archives for {} sources",
                self.archives.len(),
                self.config.sources.len()
            ));
        }

        let capacity = self.config.capacity();
        let step = self.config.step_secs;
        for (archive, spec) in self.archives.iter().zip(&self.config.sources) {
            if archive.name != spec.name {
                return Err(format!("archive '{}' where '{}' expected", archive.name, spec.name));
            }
            if archive.rows.len() > capacity {
                return Err(format!(
                    "archive '{}' holds {} rows (capacity {capacity})",
                    archive.name,
                    archive.rows.len()
                ));
            }
            let mut previous = None;
            for &(ts, _) in &archive.rows {
                if ts % step != 0 || ts > self.last_update || previous.is_some_and(|p| ts <= p) {
                    return Err(format!("archive '{}' has misplaced row at {ts}", archive.name));
                }
                previous = Some(ts);
            }
        }
        Ok(())
    }

    /// Rebuilds a store from this state.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Corrupted`] if the state is inconsistent.
    pub fn into_store(self, path: &Path) -> Result<Store, PersistError> {
        self.check().map_err(|reason| PersistError::Corrupted {
            path: path.to_path_buf(),
            reason,
        })?;

        let capacity = self.config.capacity();
        let cf = self.config.consolidation_fn;
        let archives = self
            .archives
            .into_iter()
            .map(|a| {
                Archive::restore(
                    capacity,
                    cf,
                    a.rows.into_iter().map(|(ts, v)| (ts, v.unwrap_or(f64::NAN))),
                    a.pending.unwrap_or(f64::NAN),
                )
            })
            .collect();

        Ok(Store::from_parts(self.config, self.last_update, archives))
    }
}

/// Writes the state of `store` to `path` atomically.
///
/// # Errors
///
/// Returns [`PersistError`] if the state cannot be serialized or written.
pub fn save(store: &Store, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let path = path.as_ref();
    let state = StoreState::capture(store);
    let data =
        serde_json::to_vec(&state).map_err(|e| PersistError::Serialize { source: e })?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| PersistError::Write {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    let tmp = sibling(path, "tmp");
    fs::write(&tmp, data).map_err(|e| PersistError::Write {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| PersistError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Reads a state file without checking it against any configuration.
///
/// # Errors
///
/// Returns [`PersistError`] if the file cannot be read or parsed.
pub fn load(path: impl AsRef<Path>) -> Result<StoreState, PersistError> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| PersistError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&data).map_err(|e| PersistError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Restores the store saved at `path`, or creates a fresh one.
///
/// The saved state is reused only when its definition equals `config`. A
/// changed definition is logged, the old file is moved aside to
/// `<path>.old`, and a new empty store starting at `start_time` is returned.
///
/// # Errors
///
/// Returns [`PersistError`] if the file exists but cannot be read, parsed or
/// is inconsistent, or if `config` is invalid.
pub fn open_or_initialize(
    config: StoreConfig,
    path: impl AsRef<Path>,
    start_time: u64,
) -> Result<Store, PersistError> {
    let path = path.as_ref();

    let state = match load(path) {
        Ok(state) => state,
        Err(PersistError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no saved state, creating new store");
            return Ok(Store::initialize(config, start_time)?);
        }
        Err(e) => return Err(e),
    };

    if state.config != config {
        let old = sibling(path, "old");
        warn!(
            path = %path.display(),
            moved_to = %old.display(),
            saved_hash = state.definition_hash,
            configured_hash = config.stable_hash(),
            "store definition changed, starting a new store"
        );
        fs::rename(path, &old).map_err(|e| PersistError::Write {
            path: old.clone(),
            source: e,
        })?;
        return Ok(Store::initialize(config, start_time)?);
    }

    let store = state.into_store(path)?;
    info!(
        path = %path.display(),
        last_update = store.last_update_time(),
        "restored store"
    );
    Ok(store)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
