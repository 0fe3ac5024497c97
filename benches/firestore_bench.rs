//! Firestore Performance Benchmarks
//!
//! Measures client overhead against the in-process datastore under various
//! concurrency levels, so the numbers reflect path handling, validation,
//! caching and listener fan-out rather than network latency.
//!
//! ## Benchmark Structure
//! 1. CRUD operations (get, set, update, delete)
//! 2. Queries (filtered, ordered with limit, count)
//! 3. Writes (batch commit, transactions)
//! 4. Listen operations (first snapshot, delivery after a write)
//!
//! ## Concurrency Levels
//! Tests with 1, 2, 4, 8, 16, 32, 64, 128, 256 concurrent operations
//!
//! ## Running Benchmarks
//! ```bash
//! cargo bench --bench firestore_bench
//!
//! # Specific benchmark
//! cargo bench --bench firestore_bench -- crud/get/32
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use firestore_rust_sdk::{
    firestore::{Direction, Firestore, MapValue, MemoryDatastore, MetadataChanges, Value},
    App, AppOptions,
};
use futures::future::join_all;
use futures::StreamExt;
use once_cell::sync::Lazy;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Shared runtime for all benchmarks
static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime")
});

/// Client over a pre-seeded in-process datastore
static FIRESTORE: Lazy<Firestore> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    RUNTIME.block_on(async {
        let app = App::create(AppOptions {
            api_key: "bench-api-key".to_string(),
            project_id: "bench-project".to_string(),
            app_name: None,
        })
        .await
        .expect("Failed to create app");

        let firestore = Firestore::new(&app, MemoryDatastore::new());
        seed(&firestore).await;
        firestore
    })
});

/// Concurrency levels to test
const CONCURRENCY_LEVELS: &[usize] = &[1, 2, 4, 8, 16, 32, 64, 128, 256];

const SEEDED_DOCS: usize = 256;

async fn seed(firestore: &Firestore) {
    let docs = firestore.collection("benchmark_docs").expect("Invalid collection");
    let items = firestore.collection("benchmark_query").expect("Invalid collection");
    for i in 0..SEEDED_DOCS {
        docs.document(&format!("doc_{}", i))
            .expect("Invalid document")
            .set(MapValue::new().with("value", i as i64))
            .await
            .expect("Failed to create doc");
        items
            .document(&format!("item_{}", i))
            .expect("Invalid document")
            .set(
                MapValue::new()
                    .with("category", format!("cat_{}", i % 10))
                    .with("rank", (i * 7 % SEEDED_DOCS) as i64),
            )
            .await
            .expect("Failed to create doc");
    }
}

// ============================================================================
// CRUD Benchmarks
// ============================================================================

fn bench_crud_get(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("crud");
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("get", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                let path = format!("benchmark_docs/doc_{}", i % SEEDED_DOCS);
                                let snapshot = firestore
                                    .document(&path)
                                    .expect("Invalid document")
                                    .get()
                                    .await
                                    .expect("Failed to get doc");
                                black_box(snapshot)
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.finish();
}

fn bench_crud_set(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("crud");
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("set", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                firestore
                                    .document(&format!("benchmark_set/doc_{}", i))
                                    .expect("Invalid document")
                                    .set(
                                        MapValue::new()
                                            .with("value", i as i64)
                                            .with("label", "benchmark")
                                            .with("nested", MapValue::new().with("flag", true)),
                                    )
                                    .await
                                    .expect("Failed to set doc")
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.finish();
}

fn bench_crud_update(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("crud");
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("update", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                let path = format!("benchmark_docs/doc_{}", i % SEEDED_DOCS);
                                firestore
                                    .document(&path)
                                    .expect("Invalid document")
                                    .update(MapValue::new().with("counter", Value::increment(1)))
                                    .await
                                    .expect("Failed to update doc")
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.finish();
}

fn bench_crud_delete(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("crud");
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("delete", concurrency),
            &concurrency,
            |b, &concurrency| {
                // Deleting a missing document succeeds, so the set is not recreated
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                firestore
                                    .document(&format!("benchmark_delete/doc_{}", i))
                                    .expect("Invalid document")
                                    .delete()
                                    .await
                                    .expect("Failed to delete doc")
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_query_simple(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("query");
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in CONCURRENCY_LEVELS {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("where_equal", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                let snapshot = firestore
                                    .collection("benchmark_query")
                                    .expect("Invalid collection")
                                    .where_equal_to("category", format!("cat_{}", i % 10))
                                    .expect("Invalid filter")
                                    .get()
                                    .await
                                    .expect("Query failed");
                                black_box(snapshot)
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.finish();
}

fn bench_query_ordered(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("query");
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in &[1, 8, 32] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("range_order_limit", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                let snapshot = firestore
                                    .collection("benchmark_query")
                                    .expect("Invalid collection")
                                    .where_greater_than("rank", (i % 100) as i64)
                                    .and_then(|q| q.order_by("rank", Direction::Descending))
                                    .and_then(|q| q.limit(20))
                                    .expect("Invalid query")
                                    .get()
                                    .await
                                    .expect("Query failed");
                                black_box(snapshot)
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.bench_function("count", |b| {
        b.to_async(&*RUNTIME).iter(|| async {
            let count = firestore
                .collection("benchmark_query")
                .expect("Invalid collection")
                .count()
                .get()
                .await
                .expect("Count failed");
            black_box(count.count())
        });
    });

    group.finish();
}

// ============================================================================
// Batch and Transaction Benchmarks
// ============================================================================

fn bench_batch_commit(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("writes");
    group.measurement_time(Duration::from_secs(10));

    for &size in &[1usize, 10, 100, 500] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("batch", size), &size, |b, &size| {
            b.to_async(&*RUNTIME).iter(|| async {
                let mut batch = firestore.batch();
                for i in 0..size {
                    let doc = firestore
                        .document(&format!("benchmark_batch/doc_{}", i))
                        .expect("Invalid document");
                    batch = batch
                        .set(&doc, MapValue::new().with("value", i as i64))
                        .expect("Invalid write");
                }
                batch.commit().await.expect("Batch failed")
            });
        });
    }

    group.bench_function("transaction", |b| {
        let doc = firestore
            .document("benchmark_docs/doc_0")
            .expect("Invalid document");
        b.to_async(&*RUNTIME).iter(|| async {
            firestore
                .run_transaction(|tx| {
                    let doc = doc.clone();
                    async move {
                        let snapshot = tx.get(&doc).await?;
                        let value = snapshot.get("value").and_then(Value::as_i64).unwrap_or(0);
                        tx.update(&doc, MapValue::new().with("value", value + 1))?;
                        Ok(value)
                    }
                })
                .await
                .expect("Transaction failed")
        });
    });

    group.finish();
}

// ============================================================================
// Listen Benchmarks
// ============================================================================

fn bench_listen_document(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("listen");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20); // Fewer samples for listener benchmarks

    for &concurrency in &[1, 2, 4, 8, 16, 32] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("document", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let futures: Vec<_> = (0..concurrency)
                        .map(|i| {
                            let firestore = firestore.clone();
                            async move {
                                let path = format!("benchmark_docs/doc_{}", i % SEEDED_DOCS);
                                let mut stream = firestore
                                    .document(&path)
                                    .expect("Invalid document")
                                    .listen(MetadataChanges::Exclude)
                                    .expect("Failed to listen");

                                // Wait for the initial snapshot
                                if let Some(result) = stream.next().await {
                                    black_box(result.expect("Listener error"));
                                }
                            }
                        })
                        .collect();

                    join_all(futures).await
                });
            },
        );
    }

    group.finish();
}

fn bench_listen_delivery(c: &mut Criterion) {
    let firestore = FIRESTORE.clone();

    let mut group = c.benchmark_group("listen");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for &consumers in &[1usize, 4, 16] {
        group.throughput(Throughput::Elements(consumers as u64));
        group.bench_with_input(
            BenchmarkId::new("query_fanout", consumers),
            &consumers,
            |b, &consumers| {
                b.to_async(&*RUNTIME).iter(|| async {
                    let collection = firestore
                        .collection("benchmark_listen")
                        .expect("Invalid collection");
                    let listener = collection
                        .on_snapshot(MetadataChanges::Exclude)
                        .expect("Failed to listen");
                    let mut streams: Vec<_> = (0..consumers)
                        .map(|_| listener.subscribe().expect("Failed to subscribe"))
                        .collect();
                    for stream in &mut streams {
                        black_box(stream.next().await);
                    }

                    // Measures one write reaching every consumer
                    collection
                        .doc(None)
                        .expect("Invalid document")
                        .set(MapValue::new().with("ts", Value::server_timestamp()))
                        .await
                        .expect("Failed to write");
                    for stream in &mut streams {
                        black_box(stream.next().await);
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    crud_benches,
    bench_crud_get,
    bench_crud_set,
    bench_crud_update,
    bench_crud_delete
);

criterion_group!(query_benches, bench_query_simple, bench_query_ordered);

criterion_group!(write_benches, bench_batch_commit);

criterion_group!(listen_benches, bench_listen_document, bench_listen_delivery);

criterion_main!(crud_benches, query_benches, write_benches, listen_benches);
