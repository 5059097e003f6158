//! Reconciliation benchmarks.
//!
//! Run with:
//! ```
//! cargo bench --bench reconcile_bench
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use patient_sync::premerge::premerge;
use patient_sync::test_support::generate_candidates;
use patient_sync::{reconcile, CanonicalCache, PersistenceGateway, SqliteGateway};
use std::hint::black_box;
use std::time::Duration;

// =============================================================================
// IN-MEMORY BENCHMARKS
// =============================================================================

fn bench_premerge(c: &mut Criterion) {
    let mut group = c.benchmark_group("premerge");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(3));

    for count in [1_000usize, 10_000] {
        let records = generate_candidates(count, 0.3, 42);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &records, |b, records| {
            b.iter_batched(
                || records.clone(),
                |records| black_box(premerge(records)),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Reconcile a batch against a cache already holding an overlapping batch.
fn bench_reconcile_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/warm");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(3));

    for count in [1_000usize, 10_000] {
        let seeded = premerge(generate_candidates(count, 0.3, 1)).into_records();
        let incoming = premerge(generate_candidates(count, 0.3, 2)).into_records();
        group.throughput(Throughput::Elements(incoming.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &incoming, |b, incoming| {
            b.iter_batched(
                || {
                    let cache = CanonicalCache::new();
                    cache.hydrate(seeded.iter().cloned());
                    (cache, incoming.clone())
                },
                |(cache, incoming)| black_box(reconcile(&cache, incoming)),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

// =============================================================================
// SQLITE BENCHMARKS
// =============================================================================

fn bench_apply_sqlite(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply/sqlite");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    let count = 5_000usize;
    let records = premerge(generate_candidates(count, 0.3, 7)).into_records();
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("cold_insert", |b| {
        b.iter_batched(
            || {
                let gateway = SqliteGateway::open_in_memory().expect("in-memory sqlite");
                let diff = reconcile(&CanonicalCache::new(), records.clone());
                (gateway, diff)
            },
            |(gateway, diff)| gateway.apply(&diff).expect("apply diff"),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_premerge,
    bench_reconcile_warm,
    bench_apply_sqlite
);
criterion_main!(benches);
