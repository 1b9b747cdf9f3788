//! Benchmarks for identifier set algebra and index search
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tagsieve::index::{
    DateFilterCostCache, IdentifierSet, IndexSearch, IndexWriter, KeyBufferPool, SearchDeadline,
    TagFilterSet,
};
use tagsieve::ingest::Row;
use tagsieve::query::LabelMatcher;
use tagsieve::storage::{IndexTable, MemoryTable, Tenant};

const DAY: u64 = 86_400_000;
const T0: u64 = 1_700_006_400_000;

fn stepped_set(count: u64, step: u64) -> IdentifierSet {
    (0..count).map(|i| i * step).collect()
}

fn bench_id_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_set");

    for size in [1_000u64, 100_000] {
        let a = stepped_set(size, 2);
        let b = stepped_set(size, 3);
        group.throughput(Throughput::Elements(size));

        group.bench_function(format!("intersect_{}", size), |bench| {
            bench.iter(|| {
                let mut s = a.clone();
                s.intersect(black_box(&b));
                s
            })
        });

        group.bench_function(format!("subtract_{}", size), |bench| {
            bench.iter(|| {
                let mut s = a.clone();
                s.subtract(black_box(&b));
                s
            })
        });

        group.bench_function(format!("union_{}", size), |bench| {
            bench.iter(|| {
                let mut s = a.clone();
                s.union(black_box(&b));
                s
            })
        });
    }

    let small = stepped_set(100, 997);
    let large = stepped_set(200_000, 1);
    group.bench_function("intersect_skewed", |bench| {
        bench.iter(|| {
            let mut s = small.clone();
            s.intersect(black_box(&large));
            s
        })
    });

    group.finish();
}

/// 10k series: 10 jobs, 100 pods each spread over 10 nodes, across 3 days
fn populated_table() -> Arc<dyn IndexTable> {
    let table: Arc<dyn IndexTable> = Arc::new(MemoryTable::new());
    let writer = IndexWriter::new(Arc::clone(&table), DAY, 65_536);
    let tenant = Tenant::new(1, 0);

    let rows: Vec<Row> = (0..10_000u64)
        .map(|i| {
            Row::new("requests", "")
                .timestamp(T0 + (i % 3) * DAY)
                .label("job", format!("job-{}", i % 10))
                .label("pod", format!("pod-{}", i))
                .label("node", format!("node-{}", i % 10))
        })
        .collect();
    writer.index_rows(tenant, &rows).unwrap();
    table
}

fn bench_range_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_query");
    let table = populated_table();
    let tenant = Tenant::new(1, 0);
    let pool = KeyBufferPool::default();

    let cases = [
        (
            "metric_and_job",
            vec![LabelMatcher::metric("requests"), LabelMatcher::equal("job", "job-3")],
        ),
        (
            "job_alternation_minus_node",
            vec![
                LabelMatcher::regex("job", "job-1|job-2|job-3"),
                LabelMatcher::not_equal("node", "node-2"),
            ],
        ),
        (
            "regex_prefix_scan",
            vec![
                LabelMatcher::equal("job", "job-7"),
                LabelMatcher::regex("pod", "pod-1.*"),
            ],
        ),
    ];

    for (name, matchers) in cases {
        let tfs = TagFilterSet::from_matchers(tenant, &matchers).unwrap();

        group.bench_function(format!("{}_cold", name), |b| {
            b.iter(|| {
                let cache = DateFilterCostCache::with_capacity(1_024);
                let deadline = SearchDeadline::after(Duration::from_secs(10));
                let mut search = IndexSearch::new(table.as_ref(), &cache, pool.clone(), deadline)
                    .with_bucket_width(DAY);
                search
                    .range_query(black_box(&tfs), T0, T0 + 3 * DAY, 1_000_000)
                    .unwrap()
            })
        });

        let warm = DateFilterCostCache::with_capacity(1_024);
        group.bench_function(format!("{}_warm", name), |b| {
            b.iter(|| {
                let deadline = SearchDeadline::after(Duration::from_secs(10));
                let mut search = IndexSearch::new(table.as_ref(), &warm, pool.clone(), deadline)
                    .with_bucket_width(DAY);
                search
                    .range_query(black_box(&tfs), T0, T0 + 3 * DAY, 1_000_000)
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_id_set, bench_range_query);
criterion_main!(benches);
