//! Scoped acquire/release guards.
//!
//! [`ScopedLock`] holds a lock for a scope and remembers whether it still
//! owns it, so an explicit early `unlock` followed by drop releases once.
//! [`ScopedUnlock`] is the inverse: it drops an already-held lock for a scope
//! and takes it back on the way out.

use std::fmt;

use crate::error::{Result, SyncError, fatal};

/// A lock the guards can drive.
pub trait Lockable {
    /// Blocks until the lock is held by the caller.
    fn lock(&self) -> Result<()>;

    /// Releases a lock held by the caller.
    fn unlock(&self);

    /// Acquires without blocking; returns whether the lock is now held.
    fn try_lock(&self) -> bool;
}

/// Holds `L` from construction until drop or [`ScopedLock::unlock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a, L: Lockable + ?Sized> {
    lockable: &'a L,
    owned: bool,
}

impl<'a, L: Lockable + ?Sized> ScopedLock<'a, L> {
    /// Blocks until `lockable` is acquired.
    pub fn new(lockable: &'a L) -> Result<Self> {
        lockable.lock()?;
        Ok(Self {
            lockable,
            owned: true,
        })
    }

    /// Attempts a non-blocking acquire; check [`ScopedLock::owns_lock`].
    pub fn try_new(lockable: &'a L) -> Self {
        let owned = lockable.try_lock();
        Self { lockable, owned }
    }

    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.owned
    }

    /// The guarded lock.
    #[must_use]
    pub fn lockable(&self) -> &'a L {
        self.lockable
    }

    /// Releases early. A second call, or the later drop, is a no-op.
    pub fn unlock(&mut self) {
        if self.owned {
            self.owned = false;
            self.lockable.unlock();
        }
    }

    /// Re-acquires after [`ScopedLock::unlock`].
    pub fn lock(&mut self) -> Result<()> {
        if self.owned {
            return Err(SyncError::lock("ScopedLock::lock", libc::EDEADLK));
        }
        self.lockable.lock()?;
        self.owned = true;
        Ok(())
    }
}

impl<L: Lockable + ?Sized> Drop for ScopedLock<'_, L> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<L: Lockable + ?Sized> fmt::Debug for ScopedLock<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock")
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

/// Releases a held `L` for a scope and re-acquires it on drop.
///
/// No bookkeeping: the caller must hold the lock when constructing this.
#[must_use = "the lock is re-acquired as soon as the guard is dropped"]
pub struct ScopedUnlock<'a, L: Lockable + ?Sized> {
    lockable: &'a L,
}

impl<'a, L: Lockable + ?Sized> ScopedUnlock<'a, L> {
    pub fn new(lockable: &'a L) -> Self {
        lockable.unlock();
        Self { lockable }
    }
}

impl<L: Lockable + ?Sized> Drop for ScopedUnlock<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.lockable.lock() {
            fatal("ScopedUnlock::drop", err.code());
        }
    }
}

impl<L: Lockable + ?Sized> fmt::Debug for ScopedUnlock<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedUnlock").finish_non_exhaustive()
    }
}
