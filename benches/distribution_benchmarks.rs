use airplay_slideshow::scheduler::{DistributionScheduler, assignment, cycles_crossed};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn benchmark_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("assignment");
    for devices in [1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(devices), &devices, |b, &devices| {
            b.iter(|| assignment(black_box(12_345), devices, black_box(997)));
        });
    }
    group.finish();
}

fn benchmark_scheduler_walk(c: &mut Criterion) {
    // A long run: 10k steps over 8 devices and 250 images
    c.bench_function("scheduler_10k_steps", |b| {
        b.iter(|| {
            let mut scheduler = DistributionScheduler::new();
            for _ in 0..10_000 {
                black_box(scheduler.next(8, 250));
            }
            scheduler.cycles_completed()
        });
    });

    c.bench_function("cycles_crossed_large_step", |b| {
        b.iter(|| cycles_crossed(black_box(u64::MAX / 4), black_box(7), black_box(31)));
    });
}

criterion_group!(benches, benchmark_assignment, benchmark_scheduler_walk);
criterion_main!(benches);
