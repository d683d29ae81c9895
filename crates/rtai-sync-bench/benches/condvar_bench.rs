//! Condition variable benchmarks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use rtai_sync::{ConditionVariable, Mutex};

fn bench_notify_no_waiters(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify_no_waiters");
    let cond = ConditionVariable::new().unwrap();

    group.bench_function("notify_one", |b| b.iter(|| cond.notify_one()));
    group.bench_function("notify_all", |b| b.iter(|| cond.notify_all()));
    group.finish();
}

fn bench_expired_wait(c: &mut Criterion) {
    let mut group = c.benchmark_group("expired_wait");
    let mutex = Mutex::new().unwrap();
    let cond = ConditionVariable::new().unwrap();

    group.bench_function("wait_for_zero", |b| {
        let mut guard = mutex.scoped_lock().unwrap();
        b.iter(|| criterion::black_box(cond.wait_for(&mut guard, Duration::ZERO).unwrap()));
    });
    group.finish();
}

struct PingPong {
    mutex: Mutex,
    cond: ConditionVariable,
    ball: AtomicBool,
    stop: AtomicBool,
}

fn bench_ping_pong(c: &mut Criterion) {
    let mut group = c.benchmark_group("ping_pong");
    let state = Arc::new(PingPong {
        mutex: Mutex::new().unwrap(),
        cond: ConditionVariable::new().unwrap(),
        ball: AtomicBool::new(false),
        stop: AtomicBool::new(false),
    });
    let partner = {
        let state = Arc::clone(&state);
        std::thread::spawn(move || {
            let mut guard = state.mutex.scoped_lock().unwrap();
            loop {
                state
                    .cond
                    .wait_pred(&mut guard, || {
                        state.ball.load(Ordering::Relaxed) || state.stop.load(Ordering::Relaxed)
                    })
                    .unwrap();
                if state.stop.load(Ordering::Relaxed) {
                    break;
                }
                state.ball.store(false, Ordering::Relaxed);
                state.cond.notify_all();
            }
        })
    };

    group.bench_function("handoff", |b| {
        b.iter(|| {
            let mut guard = state.mutex.scoped_lock().unwrap();
            state.ball.store(true, Ordering::Relaxed);
            state.cond.notify_all();
            state
                .cond
                .wait_pred(&mut guard, || !state.ball.load(Ordering::Relaxed))
                .unwrap();
        });
    });
    group.finish();

    {
        let _guard = state.mutex.scoped_lock().unwrap();
        state.stop.store(true, Ordering::Relaxed);
        state.cond.notify_all();
    }
    partner.join().unwrap();
}

criterion_group!(
    benches,
    bench_notify_no_waiters,
    bench_expired_wait,
    bench_ping_pong
);
criterion_main!(benches);
