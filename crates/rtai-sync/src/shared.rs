//! Reader/writer lock built from the crate's own mutex and condition
//! variables.
//!
//! One [`Mutex`] guards the `{readers, writer, writers_waiting}` record.
//! Readers sleep on the shared gate and writers on the exclusive gate. A
//! queued writer closes the shared gate to newcomers, so a stream of readers
//! cannot starve it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::condvar::ConditionVariable;
use crate::error::{Result, fatal};
use crate::guard::{Lockable, ScopedLock};
use crate::mutex::Mutex;

/// Many readers or one writer, with writer preference.
///
/// The record atomics are only touched with `state` held; the mutex orders
/// them, so Relaxed suffices.
pub struct SharedMutex {
    state: Mutex,
    shared_gate: ConditionVariable,
    exclusive_gate: ConditionVariable,
    readers: AtomicU32,
    writer: AtomicBool,
    writers_waiting: AtomicU32,
}

impl SharedMutex {
    pub fn new() -> Result<Self> {
        Ok(Self {
            state: Mutex::new()?,
            shared_gate: ConditionVariable::new()?,
            exclusive_gate: ConditionVariable::new()?,
            readers: AtomicU32::new(0),
            writer: AtomicBool::new(false),
            writers_waiting: AtomicU32::new(0),
        })
    }

    fn record(&self, op: &'static str) -> ScopedLock<'_, Mutex> {
        self.state
            .scoped_lock()
            .unwrap_or_else(|err| fatal(op, err.code()))
    }

    /// Blocks until the caller holds the lock exclusively.
    pub fn lock(&self) -> Result<()> {
        let mut guard = self.state.scoped_lock()?;
        self.writers_waiting.fetch_add(1, Ordering::Relaxed);
        let admitted = self.exclusive_gate.wait_pred(&mut guard, || {
            !self.writer.load(Ordering::Relaxed) && self.readers.load(Ordering::Relaxed) == 0
        });
        self.writers_waiting.fetch_sub(1, Ordering::Relaxed);
        if let Err(err) = admitted {
            // Readers held back by this writer may proceed now.
            self.shared_gate.notify_all();
            return Err(err);
        }
        self.writer.store(true, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn try_lock(&self) -> bool {
        let _guard = self.record("SharedMutex::try_lock");
        if self.writer.load(Ordering::Relaxed) || self.readers.load(Ordering::Relaxed) > 0 {
            return false;
        }
        self.writer.store(true, Ordering::Relaxed);
        true
    }

    pub fn unlock(&self) {
        let _guard = self.record("SharedMutex::unlock");
        if !self.writer.load(Ordering::Relaxed) {
            fatal("SharedMutex::unlock", libc::EPERM);
        }
        self.writer.store(false, Ordering::Relaxed);
        if self.writers_waiting.load(Ordering::Relaxed) > 0 {
            self.exclusive_gate.notify_one();
        }
        self.shared_gate.notify_all();
    }

    /// Blocks until the caller holds a shared lock. Waits behind any queued
    /// writer.
    pub fn lock_shared(&self) -> Result<()> {
        let mut guard = self.state.scoped_lock()?;
        self.shared_gate.wait_pred(&mut guard, || {
            !self.writer.load(Ordering::Relaxed)
                && self.writers_waiting.load(Ordering::Relaxed) == 0
        })?;
        self.readers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn try_lock_shared(&self) -> bool {
        let _guard = self.record("SharedMutex::try_lock_shared");
        if self.writer.load(Ordering::Relaxed) || self.writers_waiting.load(Ordering::Relaxed) > 0 {
            return false;
        }
        self.readers.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn unlock_shared(&self) {
        let _guard = self.record("SharedMutex::unlock_shared");
        let readers = self.readers.load(Ordering::Relaxed);
        if readers == 0 {
            fatal("SharedMutex::unlock_shared", libc::EPERM);
        }
        self.readers.store(readers - 1, Ordering::Relaxed);
        if readers == 1 && self.writers_waiting.load(Ordering::Relaxed) > 0 {
            self.exclusive_gate.notify_one();
        }
    }

    pub fn scoped_lock(&self) -> Result<ScopedLock<'_, Self>> {
        ScopedLock::new(self)
    }

    pub fn scoped_lock_shared(&self) -> Result<SharedLock<'_>> {
        SharedLock::new(self)
    }

    /// Number of shared holders right now; advisory only.
    #[must_use]
    pub fn reader_count(&self) -> u32 {
        let _guard = self.record("SharedMutex::reader_count");
        self.readers.load(Ordering::Relaxed)
    }
}

impl Lockable for SharedMutex {
    fn lock(&self) -> Result<()> {
        SharedMutex::lock(self)
    }

    fn unlock(&self) {
        SharedMutex::unlock(self);
    }

    fn try_lock(&self) -> bool {
        SharedMutex::try_lock(self)
    }
}

impl fmt::Debug for SharedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMutex")
            .field("readers", &self.readers.load(Ordering::Relaxed))
            .field("writer", &self.writer.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Shared-side counterpart of [`ScopedLock`].
#[must_use = "the shared lock is released as soon as the guard is dropped"]
pub struct SharedLock<'a> {
    mutex: &'a SharedMutex,
    owned: bool,
}

impl<'a> SharedLock<'a> {
    pub fn new(mutex: &'a SharedMutex) -> Result<Self> {
        mutex.lock_shared()?;
        Ok(Self { mutex, owned: true })
    }

    pub fn try_new(mutex: &'a SharedMutex) -> Self {
        let owned = mutex.try_lock_shared();
        Self { mutex, owned }
    }

    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.owned
    }

    pub fn unlock(&mut self) {
        if self.owned {
            self.owned = false;
            self.mutex.unlock_shared();
        }
    }
}

impl Drop for SharedLock<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl fmt::Debug for SharedLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLock")
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}
