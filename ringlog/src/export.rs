//! Export module for daily snapshots.
//!
//! When the driver sees a day boundary it hands a [`Snapshot`] of the whole
//! store to an [`Exporter`], labelled with the date that just ended.
//!
//! # Design
//!
//! - [`JsonExporter`] writes `<root>/<yyyy-mm-dd>/<file_name>`
//! - [`FanoutExporter`] runs several exporters and tries all of them even when
//!   one fails
//! - The Prometheus remote-write exporter lives in `remote_write` behind
//!   the `prometheus-remote-write` feature
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use ringlog::export::{Exporter, JsonExporter};
//! # use ringlog::snapshot::Snapshot;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let snapshot = Snapshot { step: 300, last_update: 0, series: vec![] };
//! let exporter = JsonExporter::new("/var/lib/ringlog/exports");
//! exporter.export(&snapshot, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())?;
//! // wrote /var/lib/ringlog/exports/2024-03-01/cable_modem.json
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::ExportError;
use crate::snapshot::Snapshot;

/// Default file name written by [`JsonExporter`] inside each date directory.
pub const DEFAULT_EXPORT_FILE: &str = "cable_modem.json";

/// Persists or forwards a daily snapshot.
pub trait Exporter: Send + Sync {
    /// Exports `snapshot` under the date `label`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] if the snapshot could not be written or sent.
    fn export(&self, snapshot: &Snapshot, label: NaiveDate) -> Result<(), ExportError>;
}

impl<E: Exporter + ?Sized> Exporter for Arc<E> {
    fn export(&self, snapshot: &Snapshot, label: NaiveDate) -> Result<(), ExportError> {
        (**self).export(snapshot, label)
    }
}

/// Writes the snapshot as pretty-printed JSON into a per-date directory.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    root: PathBuf,
    file_name: String,
}

impl JsonExporter {
    /// Creates an exporter rooted at `root` using [`DEFAULT_EXPORT_FILE`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_name: DEFAULT_EXPORT_FILE.to_string(),
        }
    }

    /// Overrides the file name written inside each date directory.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Path the export for `label` is written to.
    pub fn destination(&self, label: NaiveDate) -> PathBuf {
        self.root
            .join(label.format("%Y-%m-%d").to_string())
            .join(&self.file_name)
    }

    /// Root directory of all exports.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Exporter for JsonExporter {
    fn export(&self, snapshot: &Snapshot, label: NaiveDate) -> Result<(), ExportError> {
        let path = self.destination(label);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ExportError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let data = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| ExportError::Serialize { source: e })?;
        fs::write(&path, data).map_err(|e| ExportError::Io {
            path: path.clone(),
            source: e,
        })?;

        debug!(path = %path.display(), %label, "exported snapshot");
        Ok(())
    }
}

/// Runs every inner exporter, in order.
#[derive(Default)]
pub struct FanoutExporter {
    exporters: Vec<Box<dyn Exporter>>,
}

impl FanoutExporter {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exporter.
    #[must_use]
    pub fn with(mut self, exporter: impl Exporter + 'static) -> Self {
        self.exporters.push(Box::new(exporter));
        self
    }

    /// Number of inner exporters.
    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    /// True if there are no inner exporters.
    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }
}

impl std::fmt::Debug for FanoutExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutExporter")
            .field("exporters", &self.exporters.len())
            .finish()
    }
}

impl Exporter for FanoutExporter {
    fn export(&self, snapshot: &Snapshot, label: NaiveDate) -> Result<(), ExportError> {
        let mut first = None;
        let mut failed = 0;

        for (index, exporter) in self.exporters.iter().enumerate() {
            if let Err(e) = exporter.export(snapshot, label) {
                warn!(exporter = index, error = %e, "exporter failed");
                failed += 1;
                first.get_or_insert(e);
            }
        }

        match first {
            None => Ok(()),
            Some(first) => Err(ExportError::Fanout {
                failed,
                total: self.exporters.len(),
                first: Box::new(first),
            }),
        }
    }
}
