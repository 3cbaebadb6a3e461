//! Sampling driver: the periodic tick that feeds the store.
//!
//! A [`Pipeline`] holds everything one tick touches and runs it
//! synchronously via [`Pipeline::tick`]. A [`Driver`] owns a pipeline and
//! calls `tick` on a dedicated scheduler thread, once per step, until
//! stopped.
//!
//! # Tick stages
//!
//! ```text
//! rotate ──► export ──► daily render      (only after a day boundary)
//! collect ──► ingest ──► render           (every tick)
//! ```
//!
//! Each stage fails independently. Errors are logged with the stage name and
//! never leave the tick.
//!
//! At most one collector call runs at a time. A call that outlives the
//! collect timeout fails its tick, and later ticks fail with
//! [`CollectorError::Busy`] until it returns.
//!
//! # Scheduling
//!
//! The first tick runs as soon as the driver starts. Later ticks follow a
//! fixed grid `start + n * step`. A tick that overruns its period is followed
//! immediately by one deferred tick; any further missed deadlines are skipped
//! and the grid resumes.

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::collector::Collector;
use crate::error::{CollectorError, DriverError};
use crate::export::Exporter;
use crate::render::Renderer;
use crate::rotation::RotationState;
use crate::sample::SampleBatch;
use crate::snapshot::Snapshot;
use crate::store::Store;

/// Timing and output settings of a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Period between ticks.
    pub step: Duration,
    /// Longest a collector call may take before the tick gives up on it.
    pub collect_timeout: Duration,
    /// History shown by the graphs rendered on every tick.
    pub short_window: Duration,
    /// History shown by the graphs rendered after a day boundary.
    pub daily_window: Duration,
    /// Directory graphs are written under.
    pub graph_dir: PathBuf,
}

impl DriverConfig {
    /// Five minute steps, a 30 second collect timeout, one hour short graphs
    /// and one day daily graphs.
    pub fn new(graph_dir: impl Into<PathBuf>) -> Self {
        Self {
            step: Duration::from_secs(300),
            collect_timeout: Duration::from_secs(30),
            short_window: Duration::from_secs(3_600),
            daily_window: Duration::from_secs(86_400),
            graph_dir: graph_dir.into(),
        }
    }

    /// Sets the tick period.
    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the collector timeout.
    #[must_use]
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    /// Sets the short graph window.
    #[must_use]
    pub fn with_short_window(mut self, window: Duration) -> Self {
        self.short_window = window;
        self
    }

    /// Sets the daily graph window.
    #[must_use]
    pub fn with_daily_window(mut self, window: Duration) -> Self {
        self.daily_window = window;
        self
    }
}

/// One stage of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Day-boundary check.
    Rotate,
    /// Daily snapshot export.
    Export,
    /// Full-day graph rendering.
    DailyRender,
    /// Device poll.
    Collect,
    /// Store write.
    Ingest,
    /// Short-window graph rendering.
    Render,
}

impl Stage {
    /// Lowercase stage name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rotate => "rotate",
            Self::Export => "export",
            Self::DailyRender => "daily_render",
            Self::Collect => "collect",
            Self::Ingest => "ingest",
            Self::Render => "render",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A day boundary was crossed since the previous tick.
    pub boundary_crossed: bool,
    /// The daily snapshot was exported.
    pub exported: bool,
    /// The collector returned a batch.
    pub collected: bool,
    /// The batch was accepted by the store.
    pub ingested: bool,
    /// Number of graphs written, daily and short-window combined.
    pub renders_ok: usize,
    /// Stages that failed, one entry per failure.
    pub failed: Vec<Stage>,
}

impl TickReport {
    /// True if no stage failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Everything one tick reads or writes.
pub struct Pipeline {
    store: Arc<Store>,
    collector: Arc<dyn Collector>,
    exporter: Box<dyn Exporter>,
    renderers: Vec<Box<dyn Renderer>>,
    clock: Arc<dyn Clock>,
    rotation: RotationState,
    config: DriverConfig,
    in_flight: Option<Receiver<Result<SampleBatch, CollectorError>>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store)
            .field("renderers", &self.renderers.len())
            .field("rotation", &self.rotation)
            .field("config", &self.config)
            .field("collect_in_flight", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline with no renderers.
    ///
    /// Rotation starts from the clock's current date, so the first boundary
    /// fires at the next midnight.
    pub fn new(
        store: Arc<Store>,
        collector: Arc<dyn Collector>,
        exporter: impl Exporter + 'static,
        clock: Arc<dyn Clock>,
        config: DriverConfig,
    ) -> Self {
        let rotation = RotationState::new(clock.now().date_naive());
        Self {
            store,
            collector,
            exporter: Box::new(exporter),
            renderers: Vec::new(),
            clock,
            rotation,
            config,
            in_flight: None,
        }
    }

    /// Adds a renderer; renderers run in the order they were added.
    #[must_use]
    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderers.push(Box::new(renderer));
        self
    }

    /// The store this pipeline writes to.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Driver settings.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Where `renderer` writes its full-day graph for `date`.
    pub fn daily_destination(&self, renderer: &dyn Renderer, date: NaiveDate) -> PathBuf {
        self.config
            .graph_dir
            .join(date.format("%Y-%m-%d").to_string())
            .join(format!("{}.{}", renderer.file_stem(), renderer.extension()))
    }

    /// Where `renderer` writes its short-window graph.
    pub fn short_destination(&self, renderer: &dyn Renderer) -> PathBuf {
        self.config.graph_dir.join(format!(
            "{}-{}.{}",
            renderer.file_stem(),
            self.config.short_window.as_secs(),
            renderer.extension()
        ))
    }

    /// Runs one tick synchronously.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();

        if self.rotation.check_boundary(now) {
            report.boundary_crossed = true;
            let label = RotationState::previous_day(now);
            info!(stage = %Stage::Rotate, %label, "day boundary crossed");

            let snapshot = self.store.snapshot();
            match self.exporter.export(&snapshot, label) {
                Ok(()) => report.exported = true,
                Err(e) => {
                    warn!(stage = %Stage::Export, %label, error = %e, "daily export failed");
                    report.failed.push(Stage::Export);
                }
            }

            for renderer in &self.renderers {
                let destination = self.daily_destination(renderer.as_ref(), label);
                self.render(
                    renderer.as_ref(),
                    &snapshot,
                    self.config.daily_window,
                    destination,
                    Stage::DailyRender,
                    &mut report,
                );
            }
        }

        match self.collect() {
            Ok(batch) => {
                report.collected = true;
                match self.store.ingest(&batch) {
                    Ok(()) => report.ingested = true,
                    Err(e) => {
                        warn!(
                            stage = %Stage::Ingest,
                            timestamp = batch.timestamp(),
                            error = %e,
                            "batch rejected"
                        );
                        report.failed.push(Stage::Ingest);
                    }
                }
            }
            Err(e) => {
                warn!(stage = %Stage::Collect, error = %e, "collection failed, skipping ingest");
                report.failed.push(Stage::Collect);
            }
        }

        if !self.renderers.is_empty() {
            let snapshot = self.store.snapshot();
            for renderer in &self.renderers {
                let destination = self.short_destination(renderer.as_ref());
                self.render(
                    renderer.as_ref(),
                    &snapshot,
                    self.config.short_window,
                    destination,
                    Stage::Render,
                    &mut report,
                );
            }
        }

        report
    }

    fn render(
        &self,
        renderer: &dyn Renderer,
        snapshot: &Snapshot,
        window: Duration,
        destination: PathBuf,
        stage: Stage,
        report: &mut TickReport,
    ) {
        match renderer.render(snapshot, window, &destination) {
            Ok(()) => report.renders_ok += 1,
            Err(e) => {
                warn!(
                    stage = %stage,
                    graph = renderer.file_stem(),
                    path = %destination.display(),
                    error = %e,
                    "render failed"
                );
                report.failed.push(stage);
            }
        }
    }

    /// Calls the collector on a helper thread, bounded by the collect timeout.
    ///
    /// A call that times out is kept as the in-flight call. While it runs no
    /// new call is started; once it returns its result is discarded.
    fn collect(&mut self) -> Result<SampleBatch, CollectorError> {
        if let Some(pending) = self.in_flight.take() {
            match pending.try_recv() {
                Err(TryRecvError::Empty) => {
                    self.in_flight = Some(pending);
                    return Err(CollectorError::Busy);
                }
                Ok(_) => debug!(stage = %Stage::Collect, "late collector result discarded"),
                Err(TryRecvError::Disconnected) => {}
            }
        }

        let (tx, rx) = mpsc::channel();
        let collector = Arc::clone(&self.collector);

        thread::Builder::new()
            .name("ringlog-collect".into())
            .spawn(move || {
                let _ = tx.send(collector.fetch());
            })
            .map_err(|e| CollectorError::Fetch {
                reason: format!("failed to spawn collector thread: {e}"),
            })?;

        let timeout = self.config.collect_timeout;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.in_flight = Some(rx);
                Err(CollectorError::Timeout { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(CollectorError::Disconnected),
        }
    }
}

/// Lifecycle state of a [`Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Created, not yet started.
    Idle,
    /// The scheduler thread is ticking.
    Running,
    /// Stopped for good.
    Stopped,
}

/// State shared with the scheduler thread; the condvar wakes it on stop.
#[derive(Debug)]
struct Shared {
    state: Mutex<DriverState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs a [`Pipeline`] on its own thread once per step.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use ringlog::driver::{Driver, Pipeline};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let pipeline: Pipeline = unimplemented!();
/// let driver = Driver::new(pipeline);
/// driver.start()?;
/// // ... until shutdown
/// driver.stop();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Driver {
    pipeline: Mutex<Option<Pipeline>>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    /// Creates an idle driver.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Mutex::new(Some(pipeline)),
            shared: Arc::new(Shared {
                state: Mutex::new(DriverState::Idle),
                wake: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        *self.shared.lock()
    }

    /// Starts ticking; the first tick runs immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyRunning`] or [`DriverError::Stopped`]
    /// if the driver is not idle, and [`DriverError::Spawn`] if the
    /// scheduler thread could not be created (the driver is then stopped).
    pub fn start(&self) -> Result<(), DriverError> {
        let mut state = self.shared.lock();
        match *state {
            DriverState::Running => return Err(DriverError::AlreadyRunning),
            DriverState::Stopped => return Err(DriverError::Stopped),
            DriverState::Idle => {}
        }

        let Some(pipeline) = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            *state = DriverState::Stopped;
            return Err(DriverError::Stopped);
        };

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("ringlog-driver".into())
            .spawn(move || run(pipeline, &shared))
            .map_err(|e| {
                *state = DriverState::Stopped;
                DriverError::Spawn { source: e }
            })?;

        *state = DriverState::Running;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("sampling driver started");
        Ok(())
    }

    /// Stops ticking and waits for an in-flight tick to finish.
    ///
    /// Safe to call any number of times, from any state.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if *state != DriverState::Stopped {
                *state = DriverState::Stopped;
                info!("sampling driver stopping");
            }
            self.shared.wake.notify_all();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("sampling driver thread panicked");
        }

        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scheduler loop: wait for the next deadline or a stop, then tick.
fn run(mut pipeline: Pipeline, shared: &Shared) {
    let step = pipeline.config.step;
    let mut next = Instant::now();

    loop {
        {
            let mut state = shared.lock();
            loop {
                if *state == DriverState::Stopped {
                    debug!("scheduler exiting");
                    return;
                }
                let now = Instant::now();
                if now >= next {
                    break;
                }
                state = shared
                    .wake
                    .wait_timeout(state, next - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        let started = Instant::now();
        let report = pipeline.tick();
        debug!(
            elapsed = ?started.elapsed(),
            collected = report.collected,
            ingested = report.ingested,
            renders = report.renders_ok,
            failed = report.failed.len(),
            "tick finished"
        );

        next += step;
        let now = Instant::now();
        if now > next && !step.is_zero() {
            let behind = now - next;
            let skipped = u32::try_from(behind.as_nanos() / step.as_nanos()).unwrap_or(u32::MAX);
            if skipped > 0 {
                warn!(
                    skipped,
                    step = ?step,
                    "tick overran its period, skipping missed deadlines"
                );
                next += step * skipped;
            }
        }
    }
}
