//! Benchmarks for redis-migrate on the in-memory store.
//!
//! Run with: cargo bench -p redis-migrate

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use redis_migrate::store::memory::{glob_match, MemoryStore};
use redis_migrate::{MigrationOptions, MigrationRequest, Migrator, StoreEndpoint};

fn request(concurrency: usize) -> MigrationRequest {
    MigrationRequest::new(
        StoreEndpoint::new("10.0.0.1", 6379, 0),
        StoreEndpoint::new("10.0.0.2", 6379, 0),
    )
    .with_page_size(500)
    .with_options(MigrationOptions {
        concurrency,
        ..Default::default()
    })
}

fn seeded(keys: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for i in 0..keys {
        match i % 3 {
            0 => store.insert_string(&format!("bench:{i}"), vec![b'x'; 64]),
            1 => store.insert_hash(
                &format!("bench:{i}"),
                (0..8).map(|f| (format!("f{f}"), format!("v{f}"))),
            ),
            _ => store.insert_zset(
                &format!("bench:{i}"),
                (0..8).map(|m| (format!("m{m}"), m as f64)),
            ),
        }
    }
    store
}

/// Benchmark a full move by concurrency level
fn bench_move(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("move_2000_keys");
    group.sample_size(20);

    for concurrency in [1, 8, 32] {
        group.bench_with_input(
            BenchmarkId::new("concurrency", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&runtime).iter(|| async move {
                    let src = seeded(2000);
                    let dst = MemoryStore::new();
                    let migrator = Migrator::with_stores(
                        request(concurrency),
                        Box::new(src),
                        Box::new(dst),
                    )
                    .unwrap();
                    black_box(migrator.run_move().await.unwrap())
                })
            },
        );
    }
    group.finish();
}

/// Benchmark glob matching used by the in-memory scan
fn bench_glob(c: &mut Criterion) {
    let keys: Vec<String> = (0..1000).map(|i| format!("user:{i}:session")).collect();

    c.bench_function("glob_prefix_star_1000", |b| {
        b.iter(|| {
            keys.iter()
                .filter(|k| glob_match(b"user:*", k.as_bytes()))
                .count()
        })
    });

    c.bench_function("glob_class_1000", |b| {
        b.iter(|| {
            keys.iter()
                .filter(|k| glob_match(b"user:[0-4]*:sess?on", k.as_bytes()))
                .count()
        })
    });
}

criterion_group!(benches, bench_move, bench_glob);
criterion_main!(benches);
