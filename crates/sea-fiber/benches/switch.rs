use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sea_fiber::Fiber;

fn fiber_resume(c: &mut Criterion) {
    let fiber = Fiber::new(sea_fiber::stack::MIN_STACK_SIZE, 0, None, |yielder| loop {
        yielder.suspend();
    });

    c.bench_function("fiber_resume", |b| {
        b.iter(|| {
            black_box(&fiber).resume();
        });
    });
}

criterion_group!(switch, fiber_resume);
criterion_main!(switch);
