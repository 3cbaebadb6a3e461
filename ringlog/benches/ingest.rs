//! Microbenchmarks for `ingest()` and `snapshot()`.
//!
//! Run with: `cargo bench -p ringlog -- ingest`

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ringlog::sample::SampleBatch;
use ringlog::schema::{DataSourceSpec, StoreConfig};
use ringlog::store::Store;

/// A modem-shaped store: 5 minute steps kept for a day.
fn setup_store(channels: u32) -> (Store, Vec<String>) {
    let mut names = Vec::new();
    let mut sources = Vec::new();
    for ch in 1..=channels {
        for (name, min, max) in [
            (format!("ch{ch}PowerLevel"), -15.0, 15.0),
            (format!("ch{ch}Snr"), 0.0, 50.0),
        ] {
            sources.push(DataSourceSpec::gauge(name.clone(), min, max, 600));
            names.push(name);
        }
    }
    let config = StoreConfig::new(300, 86_400, sources).unwrap();
    let store = Store::initialize_at(config, 1_700_000_000, 1_800_000_000).unwrap();
    (store, names)
}

fn batch(names: &[String], ts: u64) -> SampleBatch {
    let mut builder = SampleBatch::builder(ts);
    for (i, name) in names.iter().enumerate() {
        builder.push(name.clone(), (i % 10) as f64 + 0.5);
    }
    builder.build().unwrap()
}

fn bench_ingest_one_per_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/channels");

    for channels in [1, 8, 32] {
        let (store, names) = setup_store(channels);
        let mut ts = 1_700_000_000u64;

        group.bench_with_input(BenchmarkId::from_parameter(channels), &channels, |b, _| {
            b.iter(|| {
                ts += 300;
                store.ingest(black_box(&batch(&names, ts))).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_ingest_within_bucket(c: &mut Criterion) {
    let (store, names) = setup_store(8);
    let mut ts = 1_700_000_000u64;

    // 10 second polls fold into the open bucket most of the time
    c.bench_function("ingest/sub_step", |b| {
        b.iter(|| {
            ts += 10;
            store.ingest(black_box(&batch(&names, ts))).unwrap();
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot/channels");

    for channels in [1, 8, 32] {
        let (store, names) = setup_store(channels);
        let mut ts = 1_700_000_000u64;
        // fill every row
        for _ in 0..store.capacity() {
            ts += 300;
            store.ingest(&batch(&names, ts)).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(channels), &channels, |b, _| {
            b.iter(|| black_box(store.snapshot()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ingest_one_per_step,
    bench_ingest_within_bucket,
    bench_snapshot
);
criterion_main!(benches);
