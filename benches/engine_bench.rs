use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use broker_sim::engine::run_single_stage;
use broker_sim::models::{
    DistributionSpec, FailureDetection, SingleStageConfig, StageConfig, TandemConfig,
};
use broker_sim::tandem::run_tandem;

const DURATION: f64 = 100.0;
const SERVERS: usize = 10;

fn stage(name: &str, service: DistributionSpec) -> StageConfig {
    StageConfig {
        name: name.to_string(),
        servers: SERVERS,
        service,
    }
}

fn build_single(service: DistributionSpec) -> SingleStageConfig {
    SingleStageConfig {
        arrival_rate: 160.0,
        stage: stage("broker", service),
        warmup: 10.0,
        duration: DURATION,
        seed: 1,
    }
}

fn build_tandem(failure_probability: f64) -> TandemConfig {
    TandemConfig {
        arrival_rate: 100.0,
        broker: stage("broker", DistributionSpec::Exponential { rate: 20.0 }),
        receiver: stage("receiver", DistributionSpec::Erlang { k: 2, mean: 0.05 }),
        network_delay: DistributionSpec::exponential_mean(0.001),
        failure_probability,
        max_attempts: None,
        retry_backoff: 0.001,
        failure_detection: FailureDetection::AtReceiver,
        warmup: 10.0,
        duration: DURATION,
        seed: 1,
    }
}

fn bench_single_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_stage");
    let size_label = format!("{}s x{}", DURATION, SERVERS);
    let services = [
        DistributionSpec::Exponential { rate: 20.0 },
        DistributionSpec::Erlang { k: 4, mean: 0.05 },
        DistributionSpec::Pareto {
            shape: 2.5,
            scale: 0.03,
        },
    ];

    for service in services {
        group.bench_with_input(
            BenchmarkId::new(service.family(), &size_label),
            &service,
            |b, service: &DistributionSpec| {
                b.iter_batched(
                    || build_single(service.clone()),
                    |config| {
                        let record = run_single_stage(&config).expect("simulation should succeed");
                        black_box(record.summary());
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_tandem(c: &mut Criterion) {
    let mut group = c.benchmark_group("tandem");

    for p in [0.0, 0.2, 0.4] {
        group.bench_with_input(BenchmarkId::new("failure", p), &p, |b, &p| {
            b.iter_batched(
                || build_tandem(p),
                |config| {
                    let record = run_tandem(&config).expect("simulation should succeed");
                    black_box(record.summary());
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_stage, bench_tandem);
criterion_main!(benches);
