//! # ringlog
//!
//! Round-robin gauge store and scheduled sampling driver for device status
//! loggers.
//!
//! ringlog keeps a fixed-size history of instantaneous readings (a cable
//! modem's per-channel power and SNR, say) in the style of rrdtool: every data
//! source owns one circular archive of step-aligned rows, consolidated with MAX
//! as samples arrive. A driver polls a collector once per step, feeds the
//! store, renders graphs and exports a snapshot of the store each time the
//! calendar date changes.
//!
//! ## Key Properties
//!
//! - Bounded memory: `sources x retention / step` rows, allocated up front
//! - Irregular arrivals are folded into step buckets; gaps longer than a
//!   source's heartbeat and out-of-range readings are recorded as unknown
//! - Out-of-order batches are rejected without touching the store
//! - One scheduler thread with a clean shutdown path; every tick stage fails
//!   independently
//!
//! ## Quick Start
//!
//! ```rust
//! use ringlog::{DataSourceSpec, SampleBatch, Store, StoreConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 5 second rows kept for 20 seconds
//! let config = StoreConfig::new(5, 20, vec![
//!     DataSourceSpec::gauge("ch1Snr", 0.0, 50.0, 10),
//! ])?;
//! let store = Store::initialize_at(config, 0, 1_000)?;
//!
//! for (t, v) in [(5, 1.0), (10, 3.0), (15, 2.0), (20, 9.0), (25, 4.0)] {
//!     store.ingest(&SampleBatch::builder(t).value("ch1Snr", v).build()?)?;
//! }
//!
//! let rows = &store.snapshot().series[0].rows;
//! assert_eq!(rows, &[(10, Some(3.0)), (15, Some(2.0)), (20, Some(9.0)), (25, Some(4.0))]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: archives, consolidation and retention
//! - [`SampleBatch`]: one poll's readings
//! - [`RotationState`]: day-boundary detection
//! - [`Driver`] / [`Pipeline`]: the periodic tick
//! - [`Collector`], [`Exporter`], [`Renderer`]: the seams to the outside world
//!
//! ## Modules
//!
//! - [`store`]: store lifecycle, ingest, snapshot
//! - [`schema`]: store and data source configuration
//! - [`consolidate`]: step-bucket consolidation
//! - [`ring`]: fixed-capacity ring buffer
//! - [`sample`]: sample batches
//! - [`snapshot`]: detached copies of store contents
//! - [`rotation`]: day-boundary detection
//! - [`clock`]: wall-clock sources
//! - [`driver`]: scheduler and tick pipeline
//! - [`collector`], [`export`], [`render`]: collaborator traits and implementations
//! - [`persist`]: saving and restoring store state
//! - `remote_write`: Prometheus remote-write exporter (feature `prometheus-remote-write`)
//! - [`error`]: error types

pub mod clock;
pub mod collector;
pub mod consolidate;
pub mod driver;
pub mod error;
pub mod export;
pub mod persist;
#[cfg(feature = "prometheus-remote-write")]
pub mod remote_write;
pub mod render;
pub mod ring;
pub mod rotation;
pub mod sample;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::Collector;
pub use driver::{Driver, DriverConfig, DriverState, Pipeline, Stage, TickReport};
pub use error::{Result, RinglogError};
pub use export::{Exporter, FanoutExporter, JsonExporter};
pub use render::{Band, GraphSpec, Renderer, SvgRenderer};
pub use rotation::RotationState;
pub use sample::SampleBatch;
pub use schema::{ConsolidationFn, DataSourceSpec, SourceKind, StoreConfig};
pub use snapshot::{SeriesSnapshot, Snapshot};
pub use store::Store;
