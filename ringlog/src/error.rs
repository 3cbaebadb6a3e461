//! Error types for the ringlog store and sampling driver.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The main error type for all ringlog operations.
///
/// Each variant wraps the error enum of one concern. Only [`ConfigError`] is
/// meant to be fatal; everything raised inside a driver tick is logged and
/// recovered locally.
#[derive(Error, Debug)]
pub enum RinglogError {
    /// Invalid store or source configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A sample batch failed validation.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// A batch could not be ingested.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// The collector could not produce a batch.
    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    /// A snapshot could not be exported.
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// A graph could not be rendered.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Store state could not be saved or restored.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// The sampling driver rejected a lifecycle transition.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Errors raised while validating a store configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The step must be at least one second.
    #[error("step must be greater than zero")]
    ZeroStep,

    /// Retention must be a positive multiple of the step.
    #[error("retention ({retention}s) must be a positive multiple of step ({step}s)")]
    RetentionNotMultiple {
        /// Configured retention in seconds.
        retention: u64,
        /// Configured step in seconds.
        step: u64,
    },

    /// The archive would hold more rows than allowed.
    #[error("archive would have {capacity} rows (max {max_rows})")]
    TooManyRows {
        /// Computed capacity.
        capacity: u64,
        /// Maximum allowed capacity.
        max_rows: u64,
    },

    /// At least one data source is required.
    #[error("at least one data source must be configured")]
    NoSources,

    /// A data source name is empty.
    #[error("data source names must not be empty")]
    EmptySourceName,

    /// Two data sources share a name.
    #[error("data source '{name}' is defined more than once")]
    DuplicateSource {
        /// The duplicated name.
        name: String,
    },

    /// The valid range of a source is not finite or is inverted.
    #[error("data source '{name}' has invalid range [{min}, {max}]")]
    InvalidRange {
        /// Source name.
        name: String,
        /// Configured minimum.
        min: f64,
        /// Configured maximum.
        max: f64,
    },

    /// Heartbeat must be at least one second.
    #[error("data source '{name}' has a zero heartbeat")]
    ZeroHeartbeat {
        /// Source name.
        name: String,
    },

    /// The start time must lie strictly before the creation time.
    #[error("start time {start} is not before creation time {now}")]
    StartNotPast {
        /// Requested start time in seconds since epoch.
        start: u64,
        /// Creation time in seconds since epoch.
        now: u64,
    },
}

/// Errors raised while building a [`SampleBatch`](crate::sample::SampleBatch).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    /// Batches must carry a non-zero timestamp.
    #[error("batch timestamp must be greater than zero")]
    ZeroTimestamp,

    /// Source names in a batch must be non-empty.
    #[error("batch contains an empty source name")]
    EmptySourceName,
}

/// A batch arrived with a timestamp not after the last accepted one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("batch timestamp {timestamp} is not after last update {last_update}")]
pub struct OutOfOrderError {
    /// Timestamp of the rejected batch.
    pub timestamp: u64,
    /// Timestamp of the last accepted batch.
    pub last_update: u64,
}

/// Errors returned by [`Store::ingest`](crate::store::Store::ingest).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Clock skew or duplicate delivery; the batch was discarded.
    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderError),
}

/// Errors produced by a [`Collector`](crate::collector::Collector).
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The device could not be reached or answered with an error.
    #[error("fetch failed: {reason}")]
    Fetch {
        /// Description of the failure.
        reason: String,
    },

    /// The fetch did not complete within the caller-supplied timeout.
    #[error("fetch timed out after {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The response did not contain the expected data.
    #[error("failed to parse status page: {reason}")]
    Parse {
        /// Description of what was missing.
        reason: String,
    },

    /// The collected values did not form a valid batch.
    #[error("invalid batch: {0}")]
    Batch(#[from] BatchError),

    /// The collector thread exited without a result.
    #[error("collector exited without producing a result")]
    Disconnected,

    /// An earlier fetch that timed out has not returned yet.
    #[error("previous fetch is still running")]
    Busy,
}

/// Errors produced by an [`Exporter`](crate::export::Exporter).
#[derive(Error, Debug)]
pub enum ExportError {
    /// Failed to create the export directory or write the file.
    #[error("failed to write export '{}': {source}", path.display())]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the snapshot.
    #[error("failed to serialize snapshot: {source}")]
    Serialize {
        /// The underlying JSON serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// One or more exporters of a fan-out failed.
    #[error("{failed} of {total} exporters failed, first: {first}")]
    Fanout {
        /// Number of failed exporters.
        failed: usize,
        /// Number of exporters tried.
        total: usize,
        /// The first failure.
        first: Box<ExportError>,
    },

    /// Remote write push failed.
    #[cfg(feature = "prometheus-remote-write")]
    #[error("remote write failed: {0}")]
    RemoteWrite(#[from] RemoteWriteError),
}

/// Errors produced by a [`Renderer`](crate::render::Renderer).
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failed to create the destination directory or write the image.
    #[error("failed to write graph '{}': {source}", path.display())]
    Io {
        /// The destination path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The renderer references a source the snapshot does not contain.
    #[error("snapshot has no source named '{name}'")]
    UnknownSource {
        /// The missing source name.
        name: String,
    },

    /// The requested window is empty.
    #[error("render window must be at least one second")]
    EmptyWindow,
}

/// Errors raised while saving or restoring store state.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Failed to read the state file.
    #[error("failed to read store state '{}': {source}", path.display())]
    Read {
        /// The state file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the state file.
    #[error("failed to write store state '{}': {source}", path.display())]
    Write {
        /// The state file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON for this format.
    #[error("failed to parse store state '{}': {source}", path.display())]
    Parse {
        /// The state file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize the state.
    #[error("failed to serialize store state: {source}")]
    Serialize {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The state file is structurally inconsistent.
    #[error("corrupted store state '{}': {reason}", path.display())]
    Corrupted {
        /// The state file path.
        path: PathBuf,
        /// Description of the inconsistency.
        reason: String,
    },

    /// The configuration used to initialize a fresh store is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors returned by driver lifecycle calls.
#[derive(Error, Debug)]
pub enum DriverError {
    /// `start` was called on a running driver.
    #[error("driver is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`.
    #[error("driver has been stopped")]
    Stopped,

    /// The scheduler thread could not be spawned.
    #[error("failed to spawn scheduler thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during Prometheus remote-write operations.
#[cfg(feature = "prometheus-remote-write")]
#[derive(Error, Debug)]
pub enum RemoteWriteError {
    /// Failed to serialize `WriteRequest` to protobuf.
    #[error("failed to serialize write request: {source}")]
    Serialization {
        /// The protobuf encoding error.
        #[source]
        source: prost::EncodeError,
    },

    /// Failed to compress data with Snappy.
    #[error("failed to compress data: {source}")]
    Compression {
        /// The snappy compression error.
        #[source]
        source: snap::Error,
    },

    /// Failed to create HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed after retries.
    #[error("HTTP request failed: {source}")]
    RequestFailed {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Server returned non-2xx status after retries.
    #[error("server returned status {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },
}

/// Type alias for `Result<T, RinglogError>`.
pub type Result<T> = std::result::Result<T, RinglogError>;
