//! Reentrant mutex.
//!
//! Two backends share one contract. `Native` hands reentrancy to a kernel
//! mutex initialized with the recursive attribute. `Manual` is for kernels
//! without that attribute: a short-held guard mutex protects the
//! `{locked, owner, count}` record and contenders sleep on a condition
//! variable, which releases the guard while they wait. The guard is never
//! held across a block, otherwise every unlocker would deadlock on it.
//!
//! The platform default is fixed at build time by the `manual-recursive`
//! feature.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::error::{Result, SyncError, fatal};
use crate::guard::{Lockable, ScopedLock};
use crate::kernel::{MutexKind, RawCondvar, RawMutex, Status, TaskId};

/// Which reentrancy strategy a [`RecursiveMutex`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecursiveBackendKind {
    Native,
    Manual,
}

impl RecursiveBackendKind {
    /// Backend used by [`RecursiveMutex::new`] on this build.
    pub const PLATFORM: Self = if cfg!(feature = "manual-recursive") {
        Self::Manual
    } else {
        Self::Native
    };
}

enum Backend {
    Native(RawMutex),
    Manual(ManualRecursive),
}

/// Lock that the owning task may acquire repeatedly; it is released once
/// `unlock` has been called as many times as `lock`/`try_lock` succeeded.
pub struct RecursiveMutex {
    backend: Backend,
}

impl RecursiveMutex {
    pub fn new() -> Result<Self> {
        Self::with_backend(RecursiveBackendKind::PLATFORM)
    }

    pub fn with_backend(kind: RecursiveBackendKind) -> Result<Self> {
        let backend = match kind {
            RecursiveBackendKind::Native => Backend::Native(
                RawMutex::init(MutexKind::Recursive)
                    .map_err(|code| SyncError::resource("RecursiveMutex::new", code))?,
            ),
            RecursiveBackendKind::Manual => Backend::Manual(ManualRecursive::new()?),
        };
        Ok(Self { backend })
    }

    #[must_use]
    pub fn backend(&self) -> RecursiveBackendKind {
        match self.backend {
            Backend::Native(_) => RecursiveBackendKind::Native,
            Backend::Manual(_) => RecursiveBackendKind::Manual,
        }
    }

    pub fn lock(&self) -> Result<()> {
        match &self.backend {
            Backend::Native(raw) => match raw.lock() {
                Status::Ok => Ok(()),
                status => Err(SyncError::lock("RecursiveMutex::lock", status.code())),
            },
            Backend::Manual(manual) => {
                manual.lock();
                Ok(())
            }
        }
    }

    pub fn unlock(&self) {
        match &self.backend {
            Backend::Native(raw) => {
                let status = raw.unlock();
                if !status.is_ok() {
                    fatal("RecursiveMutex::unlock", status.code());
                }
            }
            Backend::Manual(manual) => manual.unlock(),
        }
    }

    /// Succeeds when the mutex is free or already owned by the caller; in the
    /// latter case the depth grows by one.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        match &self.backend {
            Backend::Native(raw) => match raw.try_lock() {
                Status::Ok => true,
                Status::Busy => false,
                status => {
                    log::warn!("RecursiveMutex::try_lock: kernel status {}", status.code());
                    false
                }
            },
            Backend::Manual(manual) => manual.try_lock(),
        }
    }

    /// Kernel handle of the native backend; `None` for the manual one, whose
    /// internal mutex is not the lock callers hold.
    #[must_use]
    pub fn native_handle(&self) -> Option<*mut libc::pthread_mutex_t> {
        match &self.backend {
            Backend::Native(raw) => Some(raw.native_handle()),
            Backend::Manual(_) => None,
        }
    }

    pub fn scoped_lock(&self) -> Result<ScopedLock<'_, Self>> {
        ScopedLock::new(self)
    }

    pub fn scoped_try_lock(&self) -> ScopedLock<'_, Self> {
        ScopedLock::try_new(self)
    }
}

impl Lockable for RecursiveMutex {
    fn lock(&self) -> Result<()> {
        RecursiveMutex::lock(self)
    }

    fn unlock(&self) {
        RecursiveMutex::unlock(self);
    }

    fn try_lock(&self) -> bool {
        RecursiveMutex::try_lock(self)
    }
}

impl fmt::Debug for RecursiveMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

/// Same type; kept for callers written against the `recursive_try_mutex` name.
pub type RecursiveTryMutex = RecursiveMutex;

// ---------------------------------------------------------------------------
// Manual backend
// ---------------------------------------------------------------------------

/// Reentrancy record guarded by `guard`.
///
/// The record fields are only read or written while `guard` is held, so the
/// kernel mutex provides all ordering; the atomics are Relaxed.
struct ManualRecursive {
    guard: RawMutex,
    released: RawCondvar,
    locked: AtomicBool,
    owner: AtomicU64,
    count: AtomicU32,
}

impl ManualRecursive {
    fn new() -> Result<Self> {
        let guard = RawMutex::init(MutexKind::Normal)
            .map_err(|code| SyncError::resource("RecursiveMutex::new", code))?;
        let released =
            RawCondvar::init().map_err(|code| SyncError::resource("RecursiveMutex::new", code))?;
        Ok(Self {
            guard,
            released,
            locked: AtomicBool::new(false),
            owner: AtomicU64::new(0),
            count: AtomicU32::new(0),
        })
    }

    fn bookkeeping(&self, op: &'static str) -> ScopedLock<'_, RawMutex> {
        ScopedLock::new(&self.guard).unwrap_or_else(|err| fatal(op, err.code()))
    }

    fn owned_by(&self, me: u64) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == me
    }

    fn acquire(&self, me: u64) {
        self.locked.store(true, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.owner.store(me, Ordering::Relaxed);
    }

    #[allow(unsafe_code)]
    fn lock(&self) {
        let me = TaskId::current().as_raw();
        let _guard = self.bookkeeping("RecursiveMutex::lock");
        if self.owned_by(me) {
            self.count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        while self.locked.load(Ordering::Relaxed) {
            // SAFETY: `guard` is held by this task and is the only mutex ever
            // paired with `released`.
            let status = unsafe { self.released.wait(&self.guard) };
            if !status.is_ok() {
                fatal("RecursiveMutex::lock", status.code());
            }
        }
        self.acquire(me);
    }

    fn unlock(&self) {
        let me = TaskId::current().as_raw();
        let _guard = self.bookkeeping("RecursiveMutex::unlock");
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 || !self.owned_by(me) {
            fatal("RecursiveMutex::unlock", libc::EPERM);
        }
        self.count.store(count - 1, Ordering::Relaxed);
        if count == 1 {
            self.locked.store(false, Ordering::Relaxed);
        }
        let status = self.released.signal();
        if !status.is_ok() {
            fatal("RecursiveMutex::unlock", status.code());
        }
    }

    fn try_lock(&self) -> bool {
        let me = TaskId::current().as_raw();
        let _guard = self.bookkeeping("RecursiveMutex::try_lock");
        if self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) != me {
            return false;
        }
        self.acquire(me);
        true
    }
}
