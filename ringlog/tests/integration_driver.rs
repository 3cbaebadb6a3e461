//! Integration tests for the sampling driver and tick pipeline.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, TimeDelta};
use ringlog::clock::{Clock, ManualClock};
use ringlog::collector::Collector;
use ringlog::driver::{Driver, DriverConfig, Pipeline, Stage};
use ringlog::error::{CollectorError, ExportError, RenderError};
use ringlog::export::{Exporter, JsonExporter};
use ringlog::render::{Band, GraphSpec, Renderer, SvgRenderer};
use ringlog::sample::SampleBatch;
use ringlog::schema::{DataSourceSpec, StoreConfig};
use ringlog::snapshot::Snapshot;
use ringlog::store::Store;
use tempfile::tempdir;

fn store() -> Arc<Store> {
    let config = StoreConfig::new(
        300,
        86_400,
        vec![
            DataSourceSpec::gauge("ch1PowerLevel", -15.0, 15.0, 600),
            DataSourceSpec::gauge("ch1Snr", 0.0, 50.0, 600),
        ],
    )
    .unwrap();
    Arc::new(Store::initialize(config, 1_000).unwrap())
}

fn clock_at(rfc3339: &str) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(DateTime::parse_from_rfc3339(rfc3339).unwrap()))
}

/// Collector reading the clock, like a real device poll would.
fn clock_collector(clock: &Arc<ManualClock>) -> Arc<dyn Collector> {
    let clock = Arc::clone(clock);
    Arc::new(move || -> Result<SampleBatch, CollectorError> {
        Ok(SampleBatch::builder(clock.unix_seconds())
            .value("ch1PowerLevel", 2.5)
            .value("ch1Snr", 38.0)
            .build()?)
    })
}

#[derive(Default)]
struct RecordingExporter {
    labels: Mutex<Vec<NaiveDate>>,
}

impl Exporter for RecordingExporter {
    fn export(&self, _snapshot: &Snapshot, label: NaiveDate) -> Result<(), ExportError> {
        self.labels.lock().unwrap().push(label);
        Ok(())
    }
}

struct FailingExporter;

impl Exporter for FailingExporter {
    fn export(&self, _snapshot: &Snapshot, _label: NaiveDate) -> Result<(), ExportError> {
        Err(ExportError::Io {
            path: PathBuf::from("/nowhere"),
            source: std::io::Error::other("disk full"),
        })
    }
}

#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<(Duration, PathBuf)>>,
}

impl Renderer for RecordingRenderer {
    fn file_stem(&self) -> &str {
        "power"
    }

    fn extension(&self) -> &str {
        "svg"
    }

    fn render(
        &self,
        _snapshot: &Snapshot,
        window: Duration,
        destination: &Path,
    ) -> Result<(), RenderError> {
        self.calls
            .lock()
            .unwrap()
            .push((window, destination.to_path_buf()));
        Ok(())
    }
}

#[test]
fn test_rotation_exports_once_and_renders_daily() {
    let clock = clock_at("2024-03-01T23:50:00+00:00");
    let exporter = Arc::new(RecordingExporter::default());
    let renderer = Arc::new(RecordingRenderer::default());

    let mut pipeline = Pipeline::new(
        store(),
        clock_collector(&clock),
        Arc::clone(&exporter),
        clock.clone(),
        DriverConfig::new("/graphs"),
    )
    .with_renderer(Arc::clone(&renderer));

    let mut boundaries = 0;
    // 23:50 through 00:20 the next day, one tick every 5 minutes
    for _ in 0..7 {
        let report = pipeline.tick();
        assert!(report.ingested);
        if report.boundary_crossed {
            boundaries += 1;
            assert!(report.exported);
            assert_eq!(report.renders_ok, 2);
        } else {
            assert_eq!(report.renders_ok, 1);
        }
        clock.advance(TimeDelta::minutes(5));
    }

    assert_eq!(boundaries, 1);
    assert_eq!(
        *exporter.labels.lock().unwrap(),
        vec![NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()]
    );

    let calls = renderer.calls.lock().unwrap();
    let daily: Vec<_> = calls
        .iter()
        .filter(|(window, _)| *window == Duration::from_secs(86_400))
        .collect();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].1, PathBuf::from("/graphs/2024-03-01/power.svg"));
    assert_eq!(calls.len(), 8);
    assert!(
        calls
            .iter()
            .filter(|(window, _)| *window == Duration::from_secs(3_600))
            .all(|(_, path)| path == Path::new("/graphs/power-3600.svg"))
    );
}

#[test]
fn test_export_failure_does_not_block_daily_renders() {
    let clock = clock_at("2024-03-01T23:59:00+00:00");
    let renderer = Arc::new(RecordingRenderer::default());
    let mut pipeline = Pipeline::new(
        store(),
        clock_collector(&clock),
        FailingExporter,
        clock.clone(),
        DriverConfig::new("/graphs"),
    )
    .with_renderer(Arc::clone(&renderer));

    pipeline.tick();
    clock.advance(TimeDelta::minutes(5));
    let report = pipeline.tick();

    assert!(report.boundary_crossed);
    assert!(!report.exported);
    assert_eq!(report.failed, vec![Stage::Export]);
    assert!(report.ingested);
    assert_eq!(report.renders_ok, 2);
}

#[test]
fn test_collector_failure_skips_ingest_only() {
    let clock = clock_at("2024-03-01T12:00:00+00:00");
    let store = store();
    let renderer = Arc::new(RecordingRenderer::default());
    let collector: Arc<dyn Collector> =
        Arc::new(|| -> Result<SampleBatch, CollectorError> {
            Err(CollectorError::Fetch {
                reason: "connection refused".into(),
            })
        });

    let mut pipeline = Pipeline::new(
        Arc::clone(&store),
        collector,
        RecordingExporter::default(),
        clock.clone(),
        DriverConfig::new("/graphs"),
    )
    .with_renderer(Arc::clone(&renderer));

    let report = pipeline.tick();
    assert!(!report.collected);
    assert!(!report.ingested);
    assert_eq!(report.failed, vec![Stage::Collect]);
    assert_eq!(report.renders_ok, 1);
    assert_eq!(store.last_update_time(), 1_000);
}

#[test]
fn test_real_exporter_and_renderer_write_files() {
    let temp_dir = tempdir().unwrap();
    let clock = clock_at("2024-03-01T23:55:00+00:00");
    let graph_dir = temp_dir.path().join("graphs");
    let export_dir = temp_dir.path().join("exports");

    let renderer = SvgRenderer::new(GraphSpec {
        file_stem: "snr".into(),
        title: "Signal to Noise Ratio".into(),
        vertical_label: "dB".into(),
        sources: vec!["ch1Snr".into()],
        bands: vec![Band {
            label: "Warning".into(),
            from: 0.0,
            to: 33.0,
        }],
        width: 640,
        height: 360,
        font_size: 10,
    });

    let mut pipeline = Pipeline::new(
        store(),
        clock_collector(&clock),
        JsonExporter::new(&export_dir),
        clock.clone(),
        DriverConfig::new(&graph_dir),
    )
    .with_renderer(renderer);

    assert!(pipeline.tick().is_clean());
    clock.advance(TimeDelta::minutes(5));
    assert!(pipeline.tick().is_clean());
    clock.advance(TimeDelta::minutes(5));
    assert!(pipeline.tick().is_clean());

    assert!(graph_dir.join("snr-3600.svg").exists());
    assert!(graph_dir.join("2024-03-01").join("snr.svg").exists());
    let exported = std::fs::read_to_string(export_dir.join("2024-03-01/cable_modem.json")).unwrap();
    let snapshot: Snapshot = serde_json::from_str(&exported).unwrap();
    assert_eq!(snapshot.series.len(), 2);
}

#[test]
fn test_driver_keeps_schedule_when_collector_fails() {
    let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let recorded = Arc::clone(&calls);
    let collector: Arc<dyn Collector> =
        Arc::new(move || -> Result<SampleBatch, CollectorError> {
            recorded.lock().unwrap().push(Instant::now());
            Err(CollectorError::Fetch {
                reason: "unreachable".into(),
            })
        });

    let store = store();
    let step = Duration::from_millis(100);
    let config = DriverConfig::new("/graphs").with_step(step);
    let clock = clock_at("2024-03-01T12:00:00+00:00");
    let driver = Driver::new(Pipeline::new(
        Arc::clone(&store),
        collector,
        RecordingExporter::default(),
        clock,
        config,
    ));

    let started = Instant::now();
    driver.start().unwrap();
    thread::sleep(Duration::from_millis(550));
    driver.stop();

    let calls = calls.lock().unwrap();
    // ticks at 0, 100, ..., 500 ms
    assert!((5..=7).contains(&calls.len()), "{} ticks", calls.len());
    assert!(calls[0].duration_since(started) < Duration::from_millis(80));
    for (i, at) in calls.iter().enumerate() {
        let due = step * u32::try_from(i).unwrap();
        let offset = at.duration_since(started);
        assert!(offset + Duration::from_millis(5) >= due, "tick {i} early: {offset:?}");
    }
    assert_eq!(store.last_update_time(), 1_000);
}

#[test]
fn test_hung_collector_is_never_called_concurrently() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (r, p, c) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&calls));
    let collector: Arc<dyn Collector> =
        Arc::new(move || -> Result<SampleBatch, CollectorError> {
            c.fetch_add(1, Ordering::SeqCst);
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(400));
            r.fetch_sub(1, Ordering::SeqCst);
            Err(CollectorError::Fetch {
                reason: "device hung".into(),
            })
        });

    let config = DriverConfig::new("/graphs")
        .with_step(Duration::from_millis(30))
        .with_collect_timeout(Duration::from_millis(10));
    let driver = Driver::new(Pipeline::new(
        store(),
        collector,
        RecordingExporter::default(),
        clock_at("2024-03-01T12:00:00+00:00"),
        config,
    ));

    driver.start().unwrap();
    thread::sleep(Duration::from_millis(1_000));
    driver.stop();

    // about 30 ticks ran, but each call waited for the previous one
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let calls = calls.load(Ordering::SeqCst);
    assert!((2..=3).contains(&calls), "{calls} calls");
}

#[test]
fn test_driver_stop_waits_for_in_flight_tick() {
    let finished = Arc::new(AtomicUsize::new(0));
    let done = Arc::clone(&finished);
    let collector: Arc<dyn Collector> =
        Arc::new(move || -> Result<SampleBatch, CollectorError> {
            thread::sleep(Duration::from_millis(150));
            done.fetch_add(1, Ordering::SeqCst);
            Err(CollectorError::Disconnected)
        });

    let config = DriverConfig::new("/graphs")
        .with_step(Duration::from_secs(60))
        .with_collect_timeout(Duration::from_secs(5));
    let driver = Driver::new(Pipeline::new(
        store(),
        collector,
        RecordingExporter::default(),
        clock_at("2024-03-01T12:00:00+00:00"),
        config,
    ));

    driver.start().unwrap();
    thread::sleep(Duration::from_millis(30));
    driver.stop();

    assert_eq!(finished.load(Ordering::SeqCst), 1);
}
