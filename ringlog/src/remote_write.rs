//! Prometheus remote-write exporter for daily snapshots.
//!
//! Serializes a [`Snapshot`] to the Prometheus remote-write protobuf format
//! and pushes it to a configurable endpoint with snappy compression and
//! basic retry logic. Every data source becomes one time series labelled
//! `source=<name>`; unknown rows are skipped.
//!
//! This module is only available when the `prometheus-remote-write` feature
//! is enabled.
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use ringlog::export::Exporter;
//! use ringlog::remote_write::{RemoteWriteConfig, RemoteWriteExporter};
//! # use ringlog::snapshot::Snapshot;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let snapshot = Snapshot { step: 300, last_update: 0, series: vec![] };
//! let config = RemoteWriteConfig::new("http://localhost:9090/api/v1/write")
//!     .with_external_label("instance", "modem-1");
//! let exporter = RemoteWriteExporter::new(config);
//! exporter.export(&snapshot, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use prost::Message;
use tracing::{debug, warn};

use crate::error::{ExportError, RemoteWriteError};
use crate::export::Exporter;
use crate::snapshot::Snapshot;

/// Default metric name every source is exported under.
pub const DEFAULT_METRIC_NAME: &str = "cable_modem_signal";

/// Prometheus remote-write protobuf types.
///
/// Hand-written types matching `prometheus/prompb/remote.proto`.
/// Using prost derives avoids the need for protoc and proto file management.
pub mod proto {
    /// A write request containing one or more time series.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        /// The time series to write.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    /// A single time series with labels and samples.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        /// Metric labels identifying the series.
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        /// Data samples for this series.
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    /// A key-value label pair.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        /// Label name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// Label value.
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A single data sample (value + timestamp).
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        /// The sample value.
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Timestamp in milliseconds since epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}

/// Configuration for a Prometheus remote-write endpoint.
#[derive(Debug, Clone)]
pub struct RemoteWriteConfig {
    /// Remote write endpoint URL (e.g., `http://localhost:9090/api/v1/write`).
    pub endpoint: String,
    /// Value of the `__name__` label.
    pub metric_name: String,
    /// HTTP timeout for write requests.
    pub timeout: Duration,
    /// Maximum number of retry attempts on failure.
    pub max_retries: u32,
    /// Initial backoff duration between retries (doubles each attempt).
    pub retry_backoff: Duration,
    /// Optional HTTP headers (e.g., for authentication).
    pub headers: Vec<(String, String)>,
    /// Labels added to every series (e.g., `instance=modem-1`).
    pub external_labels: Vec<(String, String)>,
}

impl RemoteWriteConfig {
    /// Creates a new config with sensible defaults.
    ///
    /// Defaults: 30s timeout, 3 retries, 100ms initial backoff.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            headers: Vec::new(),
            external_labels: Vec::new(),
        }
    }

    /// Adds an HTTP header (e.g., for authentication tokens).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a label to every exported series.
    #[must_use]
    pub fn with_external_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.external_labels.push((name.into(), value.into()));
        self
    }

    /// Sets the metric name.
    #[must_use]
    pub fn with_metric_name(mut self, metric_name: impl Into<String>) -> Self {
        self.metric_name = metric_name.into();
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Pushes every daily snapshot to a remote-write endpoint.
#[derive(Debug, Clone)]
pub struct RemoteWriteExporter {
    config: RemoteWriteConfig,
}

impl RemoteWriteExporter {
    /// Creates an exporter for `config`.
    pub fn new(config: RemoteWriteConfig) -> Self {
        Self { config }
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &RemoteWriteConfig {
        &self.config
    }
}

impl Exporter for RemoteWriteExporter {
    fn export(&self, snapshot: &Snapshot, label: NaiveDate) -> Result<(), ExportError> {
        let pushed = push(&self.config, snapshot)?;
        debug!(series = pushed, %label, endpoint = %self.config.endpoint, "pushed snapshot");
        Ok(())
    }
}

/// Pushes the known rows of `snapshot` to the configured endpoint.
///
/// Returns the number of series sent. Nothing is sent when the snapshot has
/// no known rows.
///
/// # Errors
///
/// Returns `RemoteWriteError` if serialization fails or the server rejects
/// the request after all retries.
pub fn push(config: &RemoteWriteConfig, snapshot: &Snapshot) -> Result<usize, RemoteWriteError> {
    let request = build_write_request(snapshot, &config.metric_name, &config.external_labels);
    if request.timeseries.is_empty() {
        return Ok(0);
    }

    let proto_bytes = serialize_write_request(&request)?;
    let compressed = compress_snappy(&proto_bytes)?;
    send_with_retry(config, &compressed)?;

    Ok(request.timeseries.len())
}

/// Encodes a snapshot as a Prometheus remote-write payload.
///
/// Returns the snappy-compressed protobuf bytes suitable for HTTP POST.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode(
    snapshot: &Snapshot,
    metric_name: &str,
    external_labels: &[(String, String)],
) -> Result<Vec<u8>, RemoteWriteError> {
    let request = build_write_request(snapshot, metric_name, external_labels);
    let proto_bytes = serialize_write_request(&request)?;
    compress_snappy(&proto_bytes)
}

/// Converts a snapshot into a `WriteRequest`, one series per source.
fn build_write_request(
    snapshot: &Snapshot,
    metric_name: &str,
    external_labels: &[(String, String)],
) -> proto::WriteRequest {
    let timeseries = snapshot
        .series
        .iter()
        .filter_map(|series| {
            let samples: Vec<proto::Sample> = series
                .known()
                .map(|(timestamp, value)| proto::Sample {
                    value,
                    timestamp: seconds_to_millis(timestamp),
                })
                .collect();
            if samples.is_empty() {
                return None;
            }
            Some(proto::TimeSeries {
                labels: build_labels(metric_name, &series.name, external_labels),
                samples,
            })
        })
        .collect();

    proto::WriteRequest { timeseries }
}

/// Label set of one source: `__name__`, `source` and the external labels,
/// sorted by name. A later duplicate name replaces an earlier one.
fn build_labels(
    metric_name: &str,
    source: &str,
    external_labels: &[(String, String)],
) -> Vec<proto::Label> {
    let labels: BTreeMap<&str, &str> = [("__name__", metric_name), ("source", source)]
        .into_iter()
        .chain(external_labels.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .collect();

    labels
        .into_iter()
        .map(|(name, value)| proto::Label {
            name: name.to_owned(),
            value: value.to_owned(),
        })
        .collect()
}

fn seconds_to_millis(seconds: u64) -> i64 {
    i64::try_from(seconds.saturating_mul(1_000)).unwrap_or(i64::MAX)
}

/// Protobuf-encodes `request`.
fn serialize_write_request(request: &proto::WriteRequest) -> Result<Vec<u8>, RemoteWriteError> {
    let mut buf = Vec::with_capacity(request.encoded_len());
    request
        .encode(&mut buf)
        .map_err(|source| RemoteWriteError::Serialization { source })?;
    Ok(buf)
}

/// Snappy block format, as remote write expects.
fn compress_snappy(data: &[u8]) -> Result<Vec<u8>, RemoteWriteError> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|source| RemoteWriteError::Compression { source })
}

/// Sends compressed protobuf to the endpoint with exponential backoff retry.
fn send_with_retry(config: &RemoteWriteConfig, body: &[u8]) -> Result<(), RemoteWriteError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| RemoteWriteError::ClientCreate { source: e })?;

    let mut backoff = config.retry_backoff;
    let mut attempt = 0;

    loop {
        let mut request = client
            .post(&config.endpoint)
            .header("Content-Encoding", "snappy")
            .header("Content-Type", "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0");

        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        let error = match request.body(body.to_vec()).send() {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().unwrap_or_default();
                RemoteWriteError::HttpStatus { status, body }
            }
            Err(e) => RemoteWriteError::RequestFailed { source: e },
        };

        if attempt >= config.max_retries {
            return Err(error);
        }
        warn!(attempt, error = %error, "remote write failed, retrying");
        std::thread::sleep(backoff);
        backoff *= 2;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SeriesSnapshot;

    fn snapshot() -> Snapshot {
        Snapshot {
            step: 300,
            last_update: 1_700_000_600,
            series: vec![
                SeriesSnapshot {
                    name: "ch1Snr".into(),
                    rows: vec![
                        (1_700_000_000, Some(38.5)),
                        (1_700_000_300, None),
                        (1_700_000_600, Some(37.0)),
                    ],
                },
                SeriesSnapshot {
                    name: "ch2Snr".into(),
                    rows: vec![(1_700_000_000, None)],
                },
            ],
        }
    }

    #[test]
    fn test_build_labels() {
        let result = build_labels("cable_modem_signal", "ch1Snr", &[]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].name, "__name__");
        assert_eq!(result[0].value, "cable_modem_signal");
        assert_eq!(result[1].name, "source");
        assert_eq!(result[1].value, "ch1Snr");
    }

    #[test]
    fn test_build_labels_with_external() {
        let external = vec![("instance".to_string(), "modem-1".to_string())];

        let result = build_labels("m", "ch1Snr", &external);

        // Should be sorted: __name__, instance, source
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].name, "__name__");
        assert_eq!(result[1].name, "instance");
        assert_eq!(result[1].value, "modem-1");
        assert_eq!(result[2].name, "source");
    }

    #[test]
    fn test_external_label_cannot_duplicate_source() {
        let external = vec![("source".to_string(), "override".to_string())];
        let result = build_labels("m", "ch1Snr", &external);

        assert_eq!(result.len(), 2);
        assert_eq!(result[1].value, "override");
    }

    #[test]
    fn test_build_write_request_skips_unknown_rows() {
        let request = build_write_request(&snapshot(), "m", &[]);

        // ch2Snr has no known rows and is dropped entirely
        assert_eq!(request.timeseries.len(), 1);
        let ts = &request.timeseries[0];
        assert_eq!(ts.samples.len(), 2);
        assert_eq!(ts.samples[0].value, 38.5);
        assert_eq!(ts.samples[0].timestamp, 1_700_000_000_000);
        assert_eq!(ts.samples[1].timestamp, 1_700_000_600_000);
    }

    #[test]
    fn test_serialize_and_compress_roundtrip() {
        let request = build_write_request(&snapshot(), "m", &[]);

        let proto_bytes = serialize_write_request(&request).unwrap();
        let compressed = compress_snappy(&proto_bytes).unwrap();

        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder.decompress_vec(&compressed).unwrap();
        assert_eq!(decompressed, proto_bytes);

        let decoded = proto::WriteRequest::decode(decompressed.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_encode_produces_valid_bytes() {
        let external = vec![("instance".to_string(), "modem-1".to_string())];
        let bytes = encode(&snapshot(), "m", &external).unwrap();

        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder.decompress_vec(&bytes).unwrap();
        let request = proto::WriteRequest::decode(decompressed.as_slice()).unwrap();

        assert_eq!(request.timeseries.len(), 1);
        assert_eq!(request.timeseries[0].labels.len(), 3);
        assert_eq!(request.timeseries[0].samples[1].value, 37.0);
    }

    #[test]
    fn test_push_without_known_rows_sends_nothing() {
        // Unreachable endpoint: succeeds only because no HTTP call is made
        let config = RemoteWriteConfig::new("http://127.0.0.1:9/api/v1/write");
        let empty = Snapshot {
            step: 300,
            last_update: 0,
            series: vec![SeriesSnapshot {
                name: "ch1Snr".into(),
                rows: vec![(300, None)],
            }],
        };
        assert_eq!(push(&config, &empty).unwrap(), 0);
    }

    #[test]
    fn test_push_failure_surfaces_as_export_error() {
        let config = RemoteWriteConfig::new("http://127.0.0.1:9/api/v1/write")
            .with_timeout(Duration::from_millis(200))
            .with_max_retries(0);
        let exporter = RemoteWriteExporter::new(config);

        let err = exporter
            .export(&snapshot(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, ExportError::RemoteWrite(_)));
    }

    #[test]
    fn test_config_builder() {
        let config = RemoteWriteConfig::new("http://example.com/write")
            .with_header("Authorization", "Bearer token123")
            .with_external_label("instance", "modem-1")
            .with_metric_name("docsis")
            .with_timeout(Duration::from_secs(10))
            .with_max_retries(5);

        assert_eq!(config.endpoint, "http://example.com/write");
        assert_eq!(config.metric_name, "docsis");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.external_labels[0].1, "modem-1");
    }
}
