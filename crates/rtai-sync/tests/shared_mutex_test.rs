#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use rtai_sync::{SharedLock, SharedMutex};

fn wait_until(label: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        if start.elapsed() > timeout {
            panic!("timeout waiting for {label}");
        }
        std::thread::yield_now();
    }
}

#[test]
fn readers_share_and_writer_excludes() {
    const READERS: usize = 4;
    const WRITERS: usize = 2;
    const ROUNDS: usize = 300;

    let lock = Arc::new(SharedMutex::new().unwrap());
    // Positive: active readers. -1: one writer.
    let occupancy = Arc::new(AtomicI32::new(0));
    let barrier = Arc::new(Barrier::new(READERS + WRITERS));
    let mut handles = Vec::new();
    for _ in 0..READERS {
        let lock = Arc::clone(&lock);
        let occupancy = Arc::clone(&occupancy);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                let _shared = lock.scoped_lock_shared().unwrap();
                let before = occupancy.fetch_add(1, Ordering::AcqRel);
                assert!(before >= 0, "reader admitted during write: {before}");
                occupancy.fetch_sub(1, Ordering::AcqRel);
            }
        }));
    }
    for _ in 0..WRITERS {
        let lock = Arc::clone(&lock);
        let occupancy = Arc::clone(&occupancy);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                let _exclusive = lock.scoped_lock().unwrap();
                let before = occupancy.swap(-1, Ordering::AcqRel);
                assert_eq!(before, 0, "writer admitted alongside others");
                occupancy.store(0, Ordering::Release);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.reader_count(), 0);
    assert!(lock.try_lock());
    lock.unlock();
}

#[test]
fn queued_writer_blocks_new_readers() {
    let lock = Arc::new(SharedMutex::new().unwrap());
    let reader = SharedLock::new(&lock).unwrap();
    let writer = {
        let lock = Arc::clone(&lock);
        std::thread::spawn(move || {
            lock.lock().unwrap();
            lock.unlock();
        })
    };
    wait_until("writer to queue", Duration::from_secs(5), || {
        if lock.try_lock_shared() {
            lock.unlock_shared();
            return false;
        }
        true
    });
    assert!(!writer.is_finished(), "writer admitted while a reader holds");
    drop(reader);
    writer.join().unwrap();
    assert!(lock.try_lock_shared(), "readers admitted again after the writer");
    lock.unlock_shared();
}
