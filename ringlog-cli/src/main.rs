//! Cable-modem signal logger built on the ringlog store.
//!
//! `ringlog run` polls the modem once per step until Ctrl-C; `info` and
//! `dump` inspect a saved state file.

mod collector;
mod config;
mod scrape;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ringlog::export::{FanoutExporter, JsonExporter};
use ringlog::persist::{self, StoreState};
use ringlog::remote_write::RemoteWriteExporter;
use ringlog::{Clock, Driver, Pipeline, Snapshot, Store, SvgRenderer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::collector::HttpCollector;
use crate::config::Config;

/// ringlog: cable-modem signal logger.
#[derive(Parser)]
#[command(name = "ringlog", version, about)]
struct Cli {
    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Poll the modem, keep history, draw graphs and export daily until Ctrl-C.
    Run {
        /// Path to the configuration file.
        #[arg(long, short, default_value = "ringlog.toml")]
        config: PathBuf,
    },

    /// Display a state file's definition and per-source usage.
    Info {
        /// Path to the state file.
        state_file: PathBuf,
    },

    /// Print the rows held in a state file.
    Dump {
        /// Path to the state file.
        state_file: PathBuf,

        /// Only this source.
        #[arg(long)]
        source: Option<String>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },
}

/// Output format for dumped rows.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON snapshot.
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Info { state_file } => cmd_info(&state_file),
        Commands::Dump {
            state_file,
            source,
            format,
        } => cmd_dump(&state_file, source.as_deref(), &format),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Implements `ringlog run`.
fn cmd_run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let clock: Arc<dyn Clock> = Arc::new(config.clock());
    let state_file = config.storage.state_file.clone();

    let store = persist::open_or_initialize(
        config.store_config()?,
        &state_file,
        clock.unix_seconds().saturating_sub(1),
    )
    .with_context(|| format!("Failed to open state file '{}'", state_file.display()))?;
    let store = Arc::new(store);
    info!(
        sources = store.config().sources.len(),
        capacity = store.capacity(),
        step_secs = store.config().step_secs,
        last_update = store.last_update_time(),
        "store ready"
    );

    // Blocking HTTP clients are built before the async runtime exists.
    let collector = HttpCollector::new(
        &config.device.status_url,
        config.table_layout(),
        Duration::from_secs(config.device.timeout_secs),
        Arc::clone(&clock),
    )?;

    let mut exporter = FanoutExporter::new().with(
        JsonExporter::new(&config.export.dir).with_file_name(&config.export.file_name),
    );
    if let Some(remote) = config.remote_write() {
        info!(endpoint = %remote.endpoint, "daily snapshots also pushed via remote write");
        exporter = exporter.with(RemoteWriteExporter::new(remote));
    }

    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::new(collector),
        exporter,
        clock,
        config.driver_config(),
    )
    .with_renderer(SvgRenderer::new(config.snr_graph()))
    .with_renderer(SvgRenderer::new(config.power_graph()));

    let driver = Driver::new(pipeline);
    driver.start()?;
    info!(url = %config.device.status_url, "logging started, Ctrl-C to stop");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let checkpoint = Duration::from_secs(config.storage.checkpoint_secs);
    runtime.block_on(wait_for_shutdown(&store, &state_file, checkpoint));

    driver.stop();
    persist::save(&store, &state_file)
        .with_context(|| format!("Failed to save state file '{}'", state_file.display()))?;
    info!(path = %state_file.display(), "state saved, exiting");
    Ok(())
}

/// Saves the store every `period` until Ctrl-C.
async fn wait_for_shutdown(store: &Store, state_file: &Path, period: Duration) {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
                }
                info!("shutdown requested");
                return;
            }
            _ = interval.tick() => {
                match persist::save(store, state_file) {
                    Ok(()) => info!(path = %state_file.display(), "checkpoint saved"),
                    Err(e) => warn!(path = %state_file.display(), error = %e, "checkpoint failed"),
                }
            }
        }
    }
}

/// Implements `ringlog info <state_file>`.
fn cmd_info(state_file: &Path) -> Result<()> {
    let state = persist::load(state_file)?;
    let config = &state.config;
    let file_size = std::fs::metadata(state_file)?.len();

    println!("State file: {}", state_file.display());
    println!("  Version: {}", state.version);
    println!("  Definition hash: {:016x}", state.definition_hash);
    println!("  Size: {}", format_bytes(file_size));
    println!();
    println!(
        "  Step: {}, retention: {}, rows per source: {}",
        format_duration_secs(config.step_secs),
        format_duration_secs(config.retention_secs),
        config.capacity()
    );
    println!("  Consolidation: {:?}", config.consolidation_fn);
    println!(
        "  Last update: {} ({})",
        format_timestamp(state.last_update),
        state.last_update
    );
    println!();
    println!("Sources: {}", config.sources.len());

    for (spec, archive) in config.sources.iter().zip(&state.archives) {
        let known = archive.rows.iter().filter(|(_, v)| v.is_some()).count();
        let span = match (archive.rows.first(), archive.rows.last()) {
            (Some(first), Some(last)) => format!(
                "{} .. {}",
                format_timestamp(first.0),
                format_timestamp(last.0)
            ),
            _ => "empty".to_string(),
        };
        println!(
            "  - {} [{}, {}] heartbeat={}: {}/{} rows, {known} known, {span}",
            spec.name,
            spec.min,
            spec.max,
            format_duration_secs(spec.heartbeat),
            archive.rows.len(),
            config.capacity()
        );
    }

    Ok(())
}

/// Implements `ringlog dump <state_file>`.
fn cmd_dump(state_file: &Path, source: Option<&str>, format: &OutputFormat) -> Result<()> {
    let snapshot = load_snapshot(state_file)?;

    let series: Vec<_> = match source {
        Some(name) => vec![
            snapshot
                .series(name)
                .with_context(|| format!("Source '{name}' not found"))?
                .clone(),
        ],
        None => snapshot.series.clone(),
    };

    match format {
        OutputFormat::Csv => {
            println!(
                "# step={}, last_update={}, sources={}",
                snapshot.step,
                snapshot.last_update,
                series.len()
            );
            println!("source,timestamp,value");
            for s in &series {
                for (ts, value) in &s.rows {
                    match value {
                        Some(v) => println!("{},{ts},{v}", s.name),
                        None => println!("{},{ts},", s.name),
                    }
                }
            }
        }
        OutputFormat::Json => {
            let output = Snapshot {
                series,
                ..snapshot
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn load_snapshot(state_file: &Path) -> Result<Snapshot> {
    let state: StoreState = persist::load(state_file)?;
    let store = state.into_store(state_file)?;
    Ok(store.snapshot())
}

fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map_or_else(|| "?".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
