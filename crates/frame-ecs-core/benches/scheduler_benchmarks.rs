//! Benchmarks comparing the scheduling algorithms' per-frame assignment cost
//! and the two time estimators' update cost.
//!
//! Run with: `cargo bench --bench scheduler_benchmarks`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use frame_ecs_core::prelude::*;

fn fixed_durations(count: usize) -> Vec<Duration> {
    (0..count).map(|i| Duration::from_micros(((i * 37) % 500 + 1) as u64)).collect()
}

struct FixedEstimator(Vec<Duration>);
impl std::fmt::Debug for FixedEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixedEstimator")
    }
}
impl TimeEstimator for FixedEstimator {
    fn estimate(&mut self, process: usize) -> Duration {
        self.0[process]
    }
    fn record(&mut self, _process: usize, _measured: Duration) {}
    fn error_stats(&self) -> EstimatorErrorStats {
        EstimatorErrorStats::default()
    }
}

fn bench_scheduling_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduling_algorithm");
    for &process_count in &[8usize, 32, 128] {
        let durations = fixed_durations(process_count);

        group.bench_with_input(BenchmarkId::new("dumb", process_count), &process_count, |b, &n| {
            b.iter(|| {
                let mut algo = Dumb::new();
                algo.begin(8);
                for p in 0..n {
                    algo.add_process(p);
                }
                let mut est = FixedEstimator(durations.clone());
                let schedule = algo.end(&mut est);
                black_box(schedule.estimated_frame_time());
            });
        });

        group.bench_with_input(BenchmarkId::new("lpt", process_count), &process_count, |b, &n| {
            b.iter(|| {
                let mut algo = Lpt::new();
                algo.begin(8);
                for p in 0..n {
                    algo.add_process(p);
                }
                let mut est = FixedEstimator(durations.clone());
                let schedule = algo.end(&mut est);
                black_box(schedule.estimated_frame_time());
            });
        });
    }
    group.finish();
}

fn bench_exhaustive_backtracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("exhaustive_backtracking");
    for &process_count in &[4usize, 7, 10] {
        let durations = fixed_durations(process_count);
        group.bench_with_input(BenchmarkId::from_parameter(process_count), &process_count, |b, &n| {
            b.iter(|| {
                let mut algo = ExhaustiveBacktracking::new();
                algo.begin(4);
                for p in 0..n {
                    algo.add_process(p);
                }
                let mut est = FixedEstimator(durations.clone());
                let schedule = algo.end(&mut est);
                black_box(schedule.estimated_frame_time());
            });
        });
    }
    group.finish();
}

fn bench_randomized_backtracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("randomized_backtracking");
    for &process_count in &[6usize, 9, 12] {
        let durations = fixed_durations(process_count);
        group.bench_with_input(BenchmarkId::from_parameter(process_count), &process_count, |b, &n| {
            b.iter(|| {
                let mut algo = RandomizedBacktracking::new(8, 7);
                algo.begin(4);
                for p in 0..n {
                    algo.add_process(p);
                }
                let mut est = FixedEstimator(durations.clone());
                let schedule = algo.end(&mut est);
                black_box(schedule.estimated_frame_time());
            });
        });
    }
    group.finish();
}

fn bench_estimators(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_estimator_update");

    group.bench_function("simple_estimator", |b| {
        b.iter(|| {
            let mut est = SimpleEstimator::new();
            for frame in 0..1_000u64 {
                let measured = Duration::from_micros(100 + (frame % 7) * 10);
                black_box(est.estimate(0));
                est.record(0, measured);
            }
        });
    });

    group.bench_function("step_estimator", |b| {
        b.iter(|| {
            let mut est = StepEstimator::default();
            for frame in 0..1_000u64 {
                let measured = Duration::from_micros(100 + (frame % 7) * 10);
                black_box(est.estimate(0));
                est.record(0, measured);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_scheduling_algorithms,
    bench_exhaustive_backtracking,
    bench_randomized_backtracking,
    bench_estimators
);
criterion_main!(benches);
