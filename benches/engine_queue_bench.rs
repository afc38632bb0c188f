use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use broker_sim::events::{Event, EventQueue};

const EVENT_COUNTS: &[usize] = &[128, 1_024, 8_192, 65_536];

fn build_events(count: usize) -> Vec<(f64, Event)> {
    (0..count)
        .map(|idx| {
            // Coarse timestamps so ties exercise the priority and sequence keys.
            let time = (idx / 4) as f64 * 0.001;
            let event = match idx % 4 {
                0 => Event::Arrival { job_id: idx },
                1 => Event::ServiceComplete {
                    stage: idx % 2,
                    job_id: idx,
                },
                2 => Event::TransferComplete { job_id: idx },
                _ => Event::RetryReady { job_id: idx },
            };
            (time, event)
        })
        .rev()
        .collect()
}

fn bench_engine_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_queue");

    for &count in EVENT_COUNTS {
        group.bench_with_input(BenchmarkId::new("push_pop", count), &count, |b, &count| {
            b.iter_batched(
                || (EventQueue::new(), build_events(count)),
                |(mut queue, events)| {
                    for (time, event) in events {
                        queue.schedule_at(time, event);
                    }
                    while let Some(event) = queue.pop() {
                        black_box(event);
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_engine_queue);
criterion_main!(benches);
