use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use sea_runtime::{AsyncScope, Scheduler, SchedulerConfig};

fn spawn_10k_single_threaded(c: &mut Criterion) {
    let scheduler = Scheduler::new(SchedulerConfig::deterministic(1));
    scheduler.start();

    const SPAWNS: usize = 10_000;

    c.bench_function("spawn_10k_single_threaded", |b| {
        b.iter(|| {
            let (tx, rx) = std::sync::mpsc::channel();
            let scope_scheduler = Arc::clone(&scheduler);
            scheduler.spawn(0, move || {
                let scope = AsyncScope::create(None, &scope_scheduler);
                let count = Arc::new(AtomicUsize::new(0));
                for _ in 0..SPAWNS {
                    let count = Arc::clone(&count);
                    scope.spawn(0, move || {
                        count.fetch_add(1, Ordering::Relaxed);
                    });
                }
                scope.wait_all();
                tx.send(()).unwrap();
            });
            rx.recv_timeout(Duration::from_secs(30)).unwrap();
        });
    });

    scheduler.stop();
}

criterion_group!(spawn, spawn_10k_single_threaded);
criterion_main!(spawn);
