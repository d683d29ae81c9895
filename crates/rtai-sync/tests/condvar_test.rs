#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use rtai_sync::{Clock, ConditionVariable, CvStatus, Mutex, SteadyClock, SystemClock};

struct Shared {
    mutex: Mutex,
    cond: ConditionVariable,
    value: AtomicU32,
    parked: AtomicU32,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mutex: Mutex::new().unwrap(),
            cond: ConditionVariable::new().unwrap(),
            value: AtomicU32::new(0),
            parked: AtomicU32::new(0),
        })
    }
}

#[test]
fn waiter_observes_mutation_with_lock_held() {
    let shared = Shared::new();
    let ready = Arc::new(Barrier::new(2));
    let waiter = {
        let shared = Arc::clone(&shared);
        let ready = Arc::clone(&ready);
        std::thread::spawn(move || {
            let mut guard = shared.mutex.scoped_lock().unwrap();
            ready.wait();
            shared
                .cond
                .wait_pred(&mut guard, || shared.value.load(Ordering::Relaxed) == 7)
                .unwrap();
            assert!(guard.owns_lock());
            assert!(!shared.mutex.try_lock(), "wait returned without the lock");
            shared.value.load(Ordering::Relaxed)
        })
    };
    ready.wait();
    {
        let _guard = shared.mutex.scoped_lock().unwrap();
        shared.value.store(7, Ordering::Relaxed);
        shared.cond.notify_one();
    }
    assert_eq!(waiter.join().unwrap(), 7);
}

/// Polls `shared.parked` under the mutex until `count` waiters have parked.
/// A waiter bumps the counter and enters its wait without releasing the
/// mutex, so once the count is seen every waiter is blocked in the wait.
fn wait_for_parked(shared: &Shared, count: u32) {
    let start = Instant::now();
    loop {
        {
            let _guard = shared.mutex.scoped_lock().unwrap();
            if shared.parked.load(Ordering::Relaxed) == count {
                return;
            }
        }
        if start.elapsed() > Duration::from_secs(5) {
            panic!(
                "timeout waiting for waiters to park: parked={} wanted={count}",
                shared.parked.load(Ordering::Relaxed)
            );
        }
        std::thread::yield_now();
    }
}

#[test]
fn one_token_wakes_exactly_one_predicate_wait() {
    const WAITERS: u32 = 4;

    let shared = Shared::new();
    let woken = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let woken = Arc::clone(&woken);
            std::thread::spawn(move || {
                let mut guard = shared.mutex.scoped_lock().unwrap();
                shared.parked.fetch_add(1, Ordering::Relaxed);
                let got = shared
                    .cond
                    .wait_for_pred(&mut guard, Duration::from_millis(300), || {
                        shared.value.load(Ordering::Relaxed) > 0
                    })
                    .unwrap();
                if got {
                    // Consume the token so the predicate is false for others.
                    shared.value.fetch_sub(1, Ordering::Relaxed);
                    woken.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    wait_for_parked(&shared, WAITERS);
    {
        let _guard = shared.mutex.scoped_lock().unwrap();
        shared.value.store(1, Ordering::Relaxed);
        shared.cond.notify_one();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Relaxed), 1, "token consumed by exactly one waiter");
    assert_eq!(shared.value.load(Ordering::Relaxed), 0);
}

#[test]
fn notify_all_releases_every_waiter() {
    const WAITERS: u32 = 3;

    let shared = Shared::new();
    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let mut guard = shared.mutex.scoped_lock().unwrap();
                shared.parked.fetch_add(1, Ordering::Relaxed);
                shared
                    .cond
                    .wait_pred(&mut guard, || shared.value.load(Ordering::Relaxed) == 1)
                    .unwrap();
            })
        })
        .collect();
    wait_for_parked(&shared, WAITERS);
    {
        let _guard = shared.mutex.scoped_lock().unwrap();
        shared.value.store(1, Ordering::Relaxed);
        shared.cond.notify_all();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn timed_out_wait_lasts_at_least_the_timeout() {
    let shared = Shared::new();
    let mut guard = shared.mutex.scoped_lock().unwrap();
    let timeout = Duration::from_millis(30);
    let start = SteadyClock::now();
    let held = shared
        .cond
        .wait_for_pred(&mut guard, timeout, || false)
        .unwrap();
    let elapsed = start.elapsed();
    assert!(!held);
    assert!(elapsed >= timeout, "elapsed={elapsed:?} timeout={timeout:?}");
}

#[test]
fn steady_deadline_times_out_after_deadline() {
    let shared = Shared::new();
    let mut guard = shared.mutex.scoped_lock().unwrap();
    let deadline = SteadyClock::now() + Duration::from_millis(20);
    loop {
        if shared.cond.wait_until(&mut guard, deadline).unwrap() == CvStatus::Timeout {
            break;
        }
    }
    assert!(deadline.has_passed());
    assert!(guard.owns_lock());
}

#[test]
fn system_deadline_predicate_wait_succeeds_when_signalled() {
    let shared = Shared::new();
    let started = Arc::new(Barrier::new(2));
    let notifier = {
        let shared = Arc::clone(&shared);
        let started = Arc::clone(&started);
        std::thread::spawn(move || {
            started.wait();
            let _guard = shared.mutex.scoped_lock().unwrap();
            shared.value.store(1, Ordering::Relaxed);
            shared.cond.notify_all();
        })
    };
    let mut guard = shared.mutex.scoped_lock().unwrap();
    started.wait();
    let deadline = SystemClock::now() + Duration::from_secs(5);
    let held = shared
        .cond
        .wait_until_pred(&mut guard, deadline, || {
            shared.value.load(Ordering::Relaxed) == 1
        })
        .unwrap();
    drop(guard);
    notifier.join().unwrap();
    assert!(held);
}

#[test]
fn past_deadline_does_not_block() {
    let shared = Shared::new();
    let mut guard = shared.mutex.scoped_lock().unwrap();
    let past = SystemClock::now();
    std::thread::sleep(Duration::from_millis(1));
    let start = SteadyClock::now();
    assert_eq!(
        shared.cond.wait_until(&mut guard, past).unwrap(),
        CvStatus::Timeout
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}
