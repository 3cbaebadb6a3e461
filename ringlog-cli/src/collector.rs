//! Cable-modem status page collector.

use std::sync::Arc;
use std::time::Duration;

use ringlog::error::CollectorError;
use ringlog::{Clock, Collector, SampleBatch};
use tracing::debug;

use crate::scrape::{TableLayout, parse_status_page};

/// Polls a modem's status page over HTTP.
pub struct HttpCollector {
    client: reqwest::blocking::Client,
    url: String,
    layout: TableLayout,
    clock: Arc<dyn Clock>,
}

impl HttpCollector {
    /// Builds the HTTP client. Must be called outside any async runtime.
    pub fn new(
        url: impl Into<String>,
        layout: TableLayout,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CollectorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectorError::Fetch {
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            layout,
            clock,
        })
    }
}

impl Collector for HttpCollector {
    fn fetch(&self) -> Result<SampleBatch, CollectorError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| CollectorError::Fetch {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Fetch {
                reason: format!("HTTP {status} from {}", self.url),
            });
        }

        let body = response.text().map_err(|e| CollectorError::Fetch {
            reason: format!("failed to read body: {e}"),
        })?;
        let timestamp = self.clock.unix_seconds();

        let batch = parse_status_page(&body, &self.layout, timestamp)?;
        debug!(timestamp, readings = batch.len(), "status page scraped");
        Ok(batch)
    }
}
