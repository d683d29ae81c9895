//! Exclusive mutex over one kernel mutex object.

use std::fmt;

use crate::config;
use crate::error::{Result, SyncError, fatal};
use crate::guard::{Lockable, ScopedLock};
use crate::kernel::{MutexKind, RawMutex, Status};

/// Non-reentrant exclusive lock.
///
/// With precondition checks enabled ([`config::check_level`]) the kernel
/// object tracks its owner: an unlock by any other task is fatal at the call
/// and a relock by the owner fails with `EDEADLK`. Without checks a relock
/// deadlocks.
pub struct Mutex {
    pub(crate) raw: RawMutex,
}

impl Mutex {
    pub fn new() -> Result<Self> {
        let kind = if config::check_level().checks_enabled() {
            MutexKind::ErrorCheck
        } else {
            MutexKind::Normal
        };
        let raw = RawMutex::init(kind).map_err(|code| SyncError::resource("Mutex::new", code))?;
        Ok(Self { raw })
    }

    /// Blocks until the caller holds the mutex.
    pub fn lock(&self) -> Result<()> {
        match self.raw.lock() {
            Status::Ok => Ok(()),
            status => Err(SyncError::lock("Mutex::lock", status.code())),
        }
    }

    /// Releases the mutex. The caller must hold it.
    pub fn unlock(&self) {
        let status = self.raw.unlock();
        if !status.is_ok() {
            fatal("Mutex::unlock", status.code());
        }
    }

    /// Acquires without blocking. A held mutex yields `false`, never an error.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        match self.raw.try_lock() {
            Status::Ok => true,
            Status::Busy => false,
            status => {
                log::warn!("Mutex::try_lock: kernel status {}", status.code());
                false
            }
        }
    }

    #[must_use]
    pub fn native_handle(&self) -> *mut libc::pthread_mutex_t {
        self.raw.native_handle()
    }

    /// Blocks until acquired and returns the owning guard.
    pub fn scoped_lock(&self) -> Result<ScopedLock<'_, Self>> {
        ScopedLock::new(self)
    }

    /// Non-blocking variant of [`Mutex::scoped_lock`].
    pub fn scoped_try_lock(&self) -> ScopedLock<'_, Self> {
        ScopedLock::try_new(self)
    }
}

impl Lockable for Mutex {
    fn lock(&self) -> Result<()> {
        Mutex::lock(self)
    }

    fn unlock(&self) {
        Mutex::unlock(self);
    }

    fn try_lock(&self) -> bool {
        Mutex::try_lock(self)
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

/// Same type; kept for callers written against the `try_mutex` name.
pub type TryMutex = Mutex;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        let m = Mutex::new().unwrap();
        m.lock().unwrap();
        m.unlock();
        m.lock().unwrap();
        m.unlock();
    }

    #[test]
    fn try_lock_on_held_mutex_is_false() {
        let m = Mutex::new().unwrap();
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn scoped_guards_release() {
        let m = Mutex::new().unwrap();
        {
            let guard = m.scoped_lock().unwrap();
            assert!(guard.owns_lock());
            let contender = m.scoped_try_lock();
            assert!(!contender.owns_lock());
        }
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn checked_mutex_refuses_owner_relock() {
        if !config::check_level().checks_enabled() {
            return;
        }
        let m = Mutex::new().unwrap();
        m.lock().unwrap();
        let err = m.lock().unwrap_err();
        assert_eq!(err, SyncError::lock("Mutex::lock", libc::EDEADLK));
        m.unlock();
        assert!(m.try_lock(), "mutex must be free after the single unlock");
        m.unlock();
    }

    #[test]
    fn native_handle_is_stable() {
        let m = Mutex::new().unwrap();
        assert!(!m.native_handle().is_null());
        assert_eq!(m.native_handle(), m.native_handle());
        let moved = m;
        assert!(moved.try_lock());
        moved.unlock();
    }
}
