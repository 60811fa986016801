//! Full and incremental send benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snapsend_bench::{changed_pair, populate, send};
use snapsend_core::SendConfig;
use snapsend_tree::MemFs;

/// Benchmark full sends of trees with a growing number of files.
fn bench_full_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_send");
    group.sample_size(20);

    for files in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*files as u64 * 4));
        group.bench_with_input(BenchmarkId::from_parameter(files), files, |b, &files| {
            let fs = MemFs::new();
            let tree = fs.create_subvolume("bench");
            populate(&tree, 4, files, 1024);

            b.iter(|| {
                let result = send(&fs, &tree, None, SendConfig::default());
                black_box(result);
            });
        });
    }
    group.finish();
}

/// Benchmark incremental sends where a fraction of the files changed.
fn bench_incremental_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_send");
    group.sample_size(20);

    for stride in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("every_nth_changed", stride),
            stride,
            |b, &stride| {
                let (fs, base, next) = changed_pair(4, 500, 1024, stride);
                b.iter(|| {
                    let result = send(&fs, &next, Some(&*base), SendConfig::default());
                    black_box(result);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark the effect of a small name cache on deep trees.
fn bench_small_name_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("name_cache_pressure");
    group.sample_size(20);

    let (fs, base, next) = changed_pair(16, 100, 256, 3);
    for high in [4, 64, 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(high), high, |b, &high| {
            let config = SendConfig::default().name_cache_water_marks(high / 2, high);
            b.iter(|| {
                let result = send(&fs, &next, Some(&*base), config.clone());
                black_box(result);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_full_send,
    bench_incremental_send,
    bench_small_name_cache
);
criterion_main!(benches);
