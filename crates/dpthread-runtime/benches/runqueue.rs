//! Run queue hot paths: enqueue/dequeue and stealing

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dpthread_core::StatusTag;
use dpthread_runtime::runqueue::RunQueues;
use dpthread_runtime::thread::Thread;
use dpthread_runtime::ThreadRef;

fn threads(n: usize) -> Vec<ThreadRef> {
    (0..n).map(|_| Thread::detached(StatusTag::NONE)).collect()
}

fn bench_push_pop(c: &mut Criterion) {
    let ths = threads(32);
    let mut rq = RunQueues::new(32);

    c.bench_function("rq_push_pop_32", |b| {
        b.iter(|| {
            for &th in &ths {
                rq.push(th);
            }
            while let Some(th) = rq.pop() {
                black_box(th);
            }
            rq.reset_indices();
        })
    });
}

fn bench_overflow(c: &mut Criterion) {
    let ths = threads(64);
    let mut rq = RunQueues::new(32);

    c.bench_function("rq_push_overflow_drain_64", |b| {
        b.iter(|| {
            for &th in &ths {
                rq.push(th);
            }
            loop {
                rq.drain_overflow();
                if rq.pop().is_none() {
                    break;
                }
            }
            rq.reset_indices();
        })
    });
}

fn bench_steal_half(c: &mut Criterion) {
    let ths = threads(32);
    let mut victim = RunQueues::new(32);
    let mut thief = RunQueues::new(32);

    c.bench_function("rq_steal_half_32", |b| {
        b.iter(|| {
            for &th in &ths {
                victim.push(th);
            }
            black_box(victim.steal_half_into(&mut thief));
            while victim.pop().is_some() {}
            while thief.pop().is_some() {}
            victim.reset_indices();
            thief.reset_indices();
        })
    });
}

criterion_group!(benches, bench_push_pop, bench_overflow, bench_steal_half);
criterion_main!(benches);
