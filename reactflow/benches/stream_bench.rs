//! Benchmarks for graph materialization and element throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reactflow::prelude::*;

fn throughput_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = StreamEngine::builder()
        .with_runtime(runtime.handle().clone())
        .build();

    let mut group = c.benchmark_group("map_filter_collect");
    for size in [100_u32, 10_000] {
        let pipeline = streams::from_iter(move || 0..size)
            .map(|n| n * 2)
            .filter(|n| n % 3 == 0)
            .to_list();
        group.bench_with_input(BenchmarkId::from_parameter(size), &pipeline, |b, pipeline| {
            b.iter(|| runtime.block_on(async { black_box(pipeline.run(&engine).unwrap().await.unwrap()) }));
        });
    }
    group.finish();
}

fn flat_map_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = StreamEngine::builder()
        .with_runtime(runtime.handle().clone())
        .build();
    let pipeline = streams::from_iter(|| 0..100_u32)
        .flat_map(|n| streams::of(vec![n, n + 1]))
        .ignore();

    c.bench_function("flat_map_100", |b| {
        b.iter(|| runtime.block_on(async { pipeline.run(&engine).unwrap().await.unwrap() }));
    });
}

fn build_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = StreamEngine::builder()
        .with_runtime(runtime.handle().clone())
        .build();
    let pipeline = streams::of(vec![1, 2, 3]).map(|n| n + 1).skip(1).limit(1);

    c.bench_function("build_publisher", |b| {
        b.iter(|| black_box(pipeline.build(&engine).unwrap()));
    });
}

criterion_group!(benches, throughput_benchmark, flat_map_benchmark, build_benchmark);
criterion_main!(benches);
