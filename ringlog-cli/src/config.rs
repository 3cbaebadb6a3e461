//! Logger configuration file.
//!
//! ```toml
//! [device]
//! status_url = "http://192.168.100.1/cmSignalData.htm"
//! downstream_channels = 8
//! upstream_channels = 1
//!
//! [storage]
//! state_file = "cable_modem.state.json"
//! step_secs = 300
//! heartbeat_secs = 600
//! sample_time_secs = 86400
//!
//! [limits]
//! downstream_snr_warning_floor = 33.0
//!
//! [graphs]
//! dir = "graphs"
//!
//! [export]
//! dir = "exports"
//!
//! [remote_write]
//! endpoint = "http://localhost:9090/api/v1/write"
//! ```
//!
//! Every key except `device.status_url` has a default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use ringlog::remote_write::RemoteWriteConfig;
use ringlog::{Band, DataSourceSpec, DriverConfig, GraphSpec, StoreConfig, SystemClock};
use serde::Deserialize;
use tracing::warn;

use crate::scrape::TableLayout;

/// Root of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The modem being polled.
    pub device: DeviceConfig,
    /// Store shape and state file.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Valid reading ranges and warning levels.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Graph output.
    #[serde(default)]
    pub graphs: GraphsConfig,
    /// Daily export output.
    #[serde(default)]
    pub export: ExportConfig,
    /// Optional Prometheus remote-write target.
    pub remote_write: Option<RemoteWriteSection>,
}

/// `[device]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Status page URL.
    pub status_url: String,
    /// Downstream channels listed on the status page.
    #[serde(default = "default_downstream_channels")]
    pub downstream_channels: u32,
    /// Upstream channels listed on the status page.
    #[serde(default = "default_upstream_channels")]
    pub upstream_channels: u32,
    /// Index of the downstream table among the page's leaf tables.
    #[serde(default)]
    pub downstream_table: usize,
    /// Index of the upstream table among the page's leaf tables.
    #[serde(default = "default_upstream_table")]
    pub upstream_table: usize,
    /// HTTP and collection timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// `[storage]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Where the store is saved between runs.
    pub state_file: PathBuf,
    /// Seconds per row; also the polling period.
    pub step_secs: u64,
    /// Longest gap between polls still treated as continuous.
    pub heartbeat_secs: u64,
    /// History kept, in seconds.
    pub sample_time_secs: u64,
    /// Seconds between state file checkpoints.
    pub checkpoint_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("cable_modem.state.json"),
            step_secs: 300,
            heartbeat_secs: 600,
            sample_time_secs: 86_400,
            checkpoint_secs: 300,
        }
    }
}

/// `[limits]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Lowest valid downstream power level, dBmV.
    pub downstream_power_min: f64,
    /// Highest valid downstream power level, dBmV.
    pub downstream_power_max: f64,
    /// Lowest valid downstream SNR, dB.
    pub downstream_snr_min: f64,
    /// Highest valid downstream SNR, dB.
    pub downstream_snr_max: f64,
    /// SNR below which the graph shows a warning band.
    pub downstream_snr_warning_floor: f64,
    /// Lowest valid upstream power level, dBmV.
    pub upstream_power_min: f64,
    /// Highest valid upstream power level, dBmV.
    pub upstream_power_max: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            downstream_power_min: -15.0,
            downstream_power_max: 15.0,
            downstream_snr_min: 0.0,
            downstream_snr_max: 50.0,
            downstream_snr_warning_floor: 33.0,
            upstream_power_min: 0.0,
            upstream_power_max: 65.0,
        }
    }
}

/// `[graphs]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphsConfig {
    /// Output directory.
    pub dir: PathBuf,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Font size in pixels.
    pub font_size: u32,
    /// History shown by the graphs redrawn every step.
    pub short_window_secs: u64,
    /// History shown by the graphs drawn once per day.
    pub daily_window_secs: u64,
}

impl Default for GraphsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("graphs"),
            width: 3840,
            height: 2160,
            font_size: 24,
            short_window_secs: 3_600,
            daily_window_secs: 86_400,
        }
    }
}

/// `[export]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Root directory; each day gets a `YYYY-MM-DD` subdirectory.
    pub dir: PathBuf,
    /// File name inside the day directory.
    pub file_name: String,
    /// Offset from UTC, in minutes, that decides when a day ends. Local time
    /// when unset.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("exports"),
            file_name: ringlog::export::DEFAULT_EXPORT_FILE.to_string(),
            utc_offset_minutes: None,
        }
    }
}

/// `[remote_write]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteWriteSection {
    /// Remote-write URL.
    pub endpoint: String,
    /// Value of the `__name__` label.
    #[serde(default)]
    pub metric_name: Option<String>,
    /// Request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Extra HTTP headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Labels added to every series.
    #[serde(default)]
    pub external_labels: BTreeMap<String, String>,
}

fn default_downstream_channels() -> u32 {
    8
}

fn default_upstream_channels() -> u32 {
    1
}

fn default_upstream_table() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Parses and validates configuration text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values the store definition does not cover.
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;
        if device.status_url.trim().is_empty() {
            bail!("device.status_url must not be empty");
        }
        if device.downstream_channels == 0 && device.upstream_channels == 0 {
            bail!("at least one of device.downstream_channels and device.upstream_channels must be greater than 0");
        }
        if device.downstream_channels > 0
            && device.upstream_channels > 0
            && device.downstream_table == device.upstream_table
        {
            bail!("device.downstream_table and device.upstream_table must differ");
        }
        if device.timeout_secs == 0 {
            bail!("device.timeout_secs must be greater than 0");
        }

        let storage = &self.storage;
        if storage.checkpoint_secs == 0 {
            bail!("storage.checkpoint_secs must be greater than 0");
        }
        if storage.state_file.as_os_str().is_empty() {
            bail!("storage.state_file must not be empty");
        }
        if device.timeout_secs > storage.step_secs {
            warn!(
                timeout_secs = device.timeout_secs,
                step_secs = storage.step_secs,
                "device.timeout_secs exceeds the step; slow polls will delay later ticks"
            );
        }

        let graphs = &self.graphs;
        if graphs.width == 0 || graphs.height == 0 || graphs.font_size == 0 {
            bail!("graphs.width, graphs.height and graphs.font_size must be greater than 0");
        }
        if graphs.short_window_secs == 0 || graphs.daily_window_secs == 0 {
            bail!("graph windows must be greater than 0");
        }
        if graphs.daily_window_secs > storage.sample_time_secs {
            warn!(
                daily_window_secs = graphs.daily_window_secs,
                sample_time_secs = storage.sample_time_secs,
                "daily graphs cover more history than the store keeps"
            );
        }

        if self.export.file_name.trim().is_empty() {
            bail!("export.file_name must not be empty");
        }
        if let Some(minutes) = self.export.utc_offset_minutes
            && offset_from_minutes(minutes).is_none()
        {
            bail!("export.utc_offset_minutes must be within +/- 24 hours, got {minutes}");
        }

        if let Some(remote) = &self.remote_write {
            if remote.endpoint.trim().is_empty() {
                bail!("remote_write.endpoint must not be empty");
            }
            if remote.timeout_secs == 0 {
                bail!("remote_write.timeout_secs must be greater than 0");
            }
        }

        // Limits and store shape are checked by the store definition itself.
        self.store_config()?;
        Ok(())
    }

    /// The store definition: per downstream channel a power and an SNR
    /// source, then one power source per upstream channel.
    pub fn store_config(&self) -> Result<StoreConfig> {
        let heartbeat = self.storage.heartbeat_secs;
        let limits = &self.limits;
        let mut sources = Vec::new();
        for ch in 1..=self.device.downstream_channels {
            sources.push(DataSourceSpec::gauge(
                downstream_power(ch),
                limits.downstream_power_min,
                limits.downstream_power_max,
                heartbeat,
            ));
            sources.push(DataSourceSpec::gauge(
                downstream_snr(ch),
                limits.downstream_snr_min,
                limits.downstream_snr_max,
                heartbeat,
            ));
        }
        for ch in 1..=self.device.upstream_channels {
            sources.push(DataSourceSpec::gauge(
                upstream_power(ch),
                limits.upstream_power_min,
                limits.upstream_power_max,
                heartbeat,
            ));
        }

        StoreConfig::new(self.storage.step_secs, self.storage.sample_time_secs, sources)
            .context("Invalid store definition")
    }

    /// Where each channel sits on the status page.
    pub fn table_layout(&self) -> TableLayout {
        TableLayout {
            downstream_table: self.device.downstream_table,
            downstream_channels: self.device.downstream_channels,
            upstream_table: self.device.upstream_table,
            upstream_channels: self.device.upstream_channels,
        }
    }

    /// Driver timing and graph locations.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig::new(&self.graphs.dir)
            .with_step(Duration::from_secs(self.storage.step_secs))
            .with_collect_timeout(Duration::from_secs(self.device.timeout_secs))
            .with_short_window(Duration::from_secs(self.graphs.short_window_secs))
            .with_daily_window(Duration::from_secs(self.graphs.daily_window_secs))
    }

    /// Downstream SNR graph with a warning band under the floor.
    pub fn snr_graph(&self) -> GraphSpec {
        let limits = &self.limits;
        GraphSpec {
            file_stem: "cable-modem_signal-to-noise-ratio".into(),
            title: "Signal to Noise Ratio".into(),
            vertical_label: "dB".into(),
            sources: (1..=self.device.downstream_channels).map(downstream_snr).collect(),
            bands: vec![Band {
                label: "Below warning floor".into(),
                from: limits.downstream_snr_min,
                to: limits.downstream_snr_warning_floor,
            }],
            width: self.graphs.width,
            height: self.graphs.height,
            font_size: self.graphs.font_size,
        }
    }

    /// Downstream power graph with warning bands 5 dB past either limit.
    pub fn power_graph(&self) -> GraphSpec {
        let limits = &self.limits;
        GraphSpec {
            file_stem: "cable-modem_power-level".into(),
            title: "Power Level".into(),
            vertical_label: "dBmV".into(),
            sources: (1..=self.device.downstream_channels).map(downstream_power).collect(),
            bands: vec![
                Band {
                    label: "Above limit".into(),
                    from: limits.downstream_power_max,
                    to: limits.downstream_power_max + 5.0,
                },
                Band {
                    label: "Below limit".into(),
                    from: limits.downstream_power_min - 5.0,
                    to: limits.downstream_power_min,
                },
            ],
            width: self.graphs.width,
            height: self.graphs.height,
            font_size: self.graphs.font_size,
        }
    }

    /// Clock deciding day boundaries.
    pub fn clock(&self) -> SystemClock {
        match self.export.utc_offset_minutes.and_then(offset_from_minutes) {
            Some(offset) => SystemClock::with_offset(offset),
            None => SystemClock::local(),
        }
    }

    /// Remote-write settings, if the section is present.
    pub fn remote_write(&self) -> Option<RemoteWriteConfig> {
        let section = self.remote_write.as_ref()?;
        let mut config = RemoteWriteConfig::new(&section.endpoint)
            .with_timeout(Duration::from_secs(section.timeout_secs))
            .with_max_retries(section.max_retries);
        if let Some(name) = &section.metric_name {
            config = config.with_metric_name(name);
        }
        for (name, value) in &section.headers {
            config = config.with_header(name, value);
        }
        for (name, value) in &section.external_labels {
            config = config.with_external_label(name, value);
        }
        Some(config)
    }
}

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

/// `ch<N>PowerLevel`
pub fn downstream_power(channel: u32) -> String {
    format!("ch{channel}PowerLevel")
}

/// `ch<N>Snr`
pub fn downstream_snr(channel: u32) -> String {
    format!("ch{channel}Snr")
}

/// `upCh<N>PowerLevel`
pub fn upstream_power(channel: u32) -> String {
    format!("upCh{channel}PowerLevel")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [device]
        status_url = "http://192.168.100.1/cmSignalData.htm"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.device.downstream_channels, 8);
        assert_eq!(config.device.upstream_channels, 1);
        assert_eq!(config.storage.step_secs, 300);
        assert_eq!(config.export.file_name, "cable_modem.json");
        assert!(config.remote_write.is_none());

        let store = config.store_config().unwrap();
        assert_eq!(store.sources.len(), 17);
        assert_eq!(store.capacity(), 288);
        assert_eq!(store.sources[0].name, "ch1PowerLevel");
        assert_eq!(store.sources[1].name, "ch1Snr");
        assert_eq!(store.sources[16].name, "upCh1PowerLevel");
        assert!((store.sources[16].max - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            [device]
            status_url = "http://modem/status"
            downstream_channels = 4
            upstream_channels = 2
            downstream_table = 2
            upstream_table = 4
            timeout_secs = 10

            [storage]
            state_file = "/var/lib/ringlog/state.json"
            step_secs = 60
            heartbeat_secs = 120
            sample_time_secs = 3600
            checkpoint_secs = 600

            [limits]
            downstream_snr_warning_floor = 35.0

            [graphs]
            dir = "/srv/graphs"
            width = 1280
            height = 720
            font_size = 12

            [export]
            dir = "/srv/exports"
            utc_offset_minutes = -300

            [remote_write]
            endpoint = "http://prom:9090/api/v1/write"
            max_retries = 5

            [remote_write.external_labels]
            instance = "modem-1"
            "#,
        )
        .unwrap();

        let store = config.store_config().unwrap();
        assert_eq!(store.sources.len(), 10);
        assert_eq!(store.capacity(), 60);
        assert_eq!(store.sources[0].heartbeat, 120);

        let driver = config.driver_config();
        assert_eq!(driver.step, Duration::from_secs(60));
        assert_eq!(driver.collect_timeout, Duration::from_secs(10));
        assert_eq!(driver.graph_dir, PathBuf::from("/srv/graphs"));

        let layout = config.table_layout();
        assert_eq!(layout.downstream_table, 2);
        assert_eq!(layout.upstream_channels, 2);

        let remote = config.remote_write().unwrap();
        assert_eq!(remote.max_retries, 5);
        assert_eq!(
            remote.external_labels,
            vec![("instance".to_string(), "modem-1".to_string())]
        );
    }

    #[test]
    fn test_graph_specs() {
        let config = Config::from_toml(MINIMAL).unwrap();

        let snr = config.snr_graph();
        assert_eq!(snr.sources.len(), 8);
        assert_eq!(snr.sources[7], "ch8Snr");
        assert_eq!(snr.bands.len(), 1);
        assert!((snr.bands[0].to - 33.0).abs() < f64::EPSILON);

        let power = config.power_graph();
        assert_eq!(power.sources[0], "ch1PowerLevel");
        assert!((power.bands[0].from - 15.0).abs() < f64::EPSILON);
        assert!((power.bands[0].to - 20.0).abs() < f64::EPSILON);
        assert!((power.bands[1].from + 20.0).abs() < f64::EPSILON);
        assert!((power.bands[1].to + 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_status_url_is_rejected() {
        assert!(Config::from_toml("[device]\ndownstream_channels = 8\n").is_err());
        assert!(Config::from_toml("[device]\nstatus_url = \"  \"\n").is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let text = format!("{MINIMAL}\n[storage]\nstep = 300\n");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn test_invalid_store_shape_is_rejected() {
        let text = format!("{MINIMAL}\n[storage]\nstep_secs = 300\nsample_time_secs = 1000\n");
        let err = Config::from_toml(&text).unwrap_err();
        assert!(format!("{err:#}").contains("store definition"));

        let text = format!("{MINIMAL}\n[limits]\ndownstream_power_min = 20.0\n");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn test_no_channels_is_rejected() {
        let text = r#"
            [device]
            status_url = "http://modem/status"
            downstream_channels = 0
            upstream_channels = 0
        "#;
        assert!(Config::from_toml(text).is_err());
    }

    #[test]
    fn test_bad_utc_offset_is_rejected() {
        let text = format!("{MINIMAL}\n[export]\nutc_offset_minutes = 2000\n");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ringlog.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        assert!(Config::load(&path).is_ok());
        let err = Config::load(temp_dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
