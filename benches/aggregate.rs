//! Benchmark suite for the aggregation hot path
//!
//! Ingestion runs once per outcome on the worker path; its overhead must
//! stay negligible next to network latency so measurement does not distort
//! the measured distribution.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use medir::timing::AttemptMetrics;
use medir::{LatencyHistogram, MetricsAggregator, Outcome, OutcomeStatus};

fn success_outcome(i: u64) -> Outcome {
    Outcome {
        status: OutcomeStatus::Success,
        attempts: 1,
        metrics: Some(AttemptMetrics {
            ttft: Some(Duration::from_micros(500 + i % 9_000)),
            total: Duration::from_millis(20 + i % 400),
            inter_token: vec![Duration::from_micros(900); 16],
            tokens: 17,
        }),
    }
}

fn benchmark_histogram_record(c: &mut Criterion) {
    let mut hist = LatencyHistogram::new();
    let mut i = 0u64;
    c.bench_function("histogram_record", |b| {
        b.iter(|| {
            i = i.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            hist.record(black_box(i % 60_000_000));
        });
    });
}

fn benchmark_histogram_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram_merge");
    for size in [1_000u64, 100_000].iter() {
        let mut a = LatencyHistogram::new();
        let mut b = LatencyHistogram::new();
        for v in 0..*size {
            a.record(v * 37);
            b.record(v * 53);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |bench, _| {
            bench.iter(|| {
                let mut merged = a.clone();
                merged.merge(black_box(&b));
                black_box(merged)
            });
        });
    }
    group.finish();
}

fn benchmark_aggregator_record(c: &mut Criterion) {
    let aggregator = MetricsAggregator::new();
    let mut i = 0u64;
    c.bench_function("aggregator_record_outcome", |b| {
        b.iter(|| {
            i += 1;
            aggregator.record(black_box(&success_outcome(i)));
        });
    });
}

fn benchmark_quantile_readout(c: &mut Criterion) {
    let mut hist = LatencyHistogram::new();
    for v in 0..200_000u64 {
        hist.record(v * 41);
    }
    c.bench_function("histogram_quantile_p99", |b| {
        b.iter(|| black_box(hist.quantile(black_box(0.99))));
    });
}

criterion_group!(
    benches,
    benchmark_histogram_record,
    benchmark_histogram_merge,
    benchmark_aggregator_record,
    benchmark_quantile_readout
);
criterion_main!(benches);
