//! Benchmarks for tts-conductor
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_partitioning(c: &mut Criterion) {
    use tts_conductor::convert::partition::{partition_missing, partition_units};

    c.bench_function("partition_units_novel", |b| {
        // A long novel split across a typical pool
        b.iter(|| {
            let parts = partition_units(black_box(25_000), black_box(8));
            black_box(parts);
        })
    });

    c.bench_function("partition_missing_scattered", |b| {
        // Resume with every third sentence missing
        let missing: Vec<usize> = (0..25_000).filter(|i| i % 3 == 0).collect();
        b.iter(|| {
            let parts = partition_missing(black_box(&missing), black_box(8));
            black_box(parts);
        })
    });
}

fn benchmark_line_parsing(c: &mut Criterion) {
    use tts_conductor::engine::{ProgressParser, StockEngineParser};

    c.bench_function("parse_progress_line", |b| {
        let parser = StockEngineParser;
        b.iter(|| {
            let line = black_box("[12:01:33] |####----| 45.6%: 1234/2600 sentences");
            black_box(parser.parse(line));
        })
    });

    c.bench_function("parse_chatter_line", |b| {
        let parser = StockEngineParser;
        b.iter(|| {
            let line = black_box("Loading model weights from checkpoint shard 3 of 4");
            black_box(parser.parse(line));
        })
    });
}

criterion_group!(benches, benchmark_partitioning, benchmark_line_parsing);
criterion_main!(benches);
