//! Raw kernel mutex and condition variable objects.
//!
//! Thin owners of `pthread_mutex_t` / `pthread_cond_t` storage. The storage
//! is boxed so its address stays fixed for the object's whole life, which
//! the kernel requires once the object is initialized. Every call goes
//! through [`retry_transient`]; construction failures come back as the raw
//! status code and destruction failures are fatal.

use std::cell::UnsafeCell;
use std::fmt;

use super::{Status, retry_transient};
use crate::clock::Timespec;
use crate::error::{Result, SyncError, fatal};
use crate::guard::Lockable;

/// Kernel mutex flavour requested at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexKind {
    /// Default attributes: no owner checks, no reentrancy.
    Normal,
    /// Kernel-tracked owner; unlock by a non-owner fails with EPERM and
    /// relock by the owner with EDEADLK.
    ErrorCheck,
    /// Kernel-tracked owner and depth.
    Recursive,
}

impl MutexKind {
    const fn attr_type(self) -> Option<libc::c_int> {
        match self {
            Self::Normal => None,
            Self::ErrorCheck => Some(libc::PTHREAD_MUTEX_ERRORCHECK),
            Self::Recursive => Some(libc::PTHREAD_MUTEX_RECURSIVE),
        }
    }
}

/// One kernel mutual-exclusion object.
pub struct RawMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// SAFETY: the kernel object is designed to be shared between tasks; all
// access goes through the kernel's own synchronization.
unsafe impl Send for RawMutex {}
// SAFETY: see above.
unsafe impl Sync for RawMutex {}

impl RawMutex {
    /// Initializes a kernel mutex. On failure returns the positive status code.
    pub fn init(kind: MutexKind) -> core::result::Result<Self, i32> {
        // SAFETY: all-zero storage is valid input for pthread_mutex_init.
        let inner: Box<UnsafeCell<libc::pthread_mutex_t>> =
            Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        let handle = inner.get();
        let status = match kind.attr_type() {
            None => retry_transient("pthread_mutex_init", || {
                // SAFETY: storage is boxed and not yet initialized.
                unsafe { libc::pthread_mutex_init(handle, std::ptr::null()) }
            }),
            Some(attr_type) => init_typed(handle, attr_type),
        };
        if status.is_ok() {
            log::trace!("kernel mutex initialized ({kind:?})");
            Ok(Self { inner })
        } else {
            Err(status.code())
        }
    }

    /// Kernel handle, valid for as long as `self` lives.
    #[must_use]
    pub fn native_handle(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }

    pub fn lock(&self) -> Status {
        retry_transient("pthread_mutex_lock", || {
            // SAFETY: handle points at an initialized kernel mutex.
            unsafe { libc::pthread_mutex_lock(self.native_handle()) }
        })
    }

    pub fn try_lock(&self) -> Status {
        retry_transient("pthread_mutex_trylock", || {
            // SAFETY: handle points at an initialized kernel mutex.
            unsafe { libc::pthread_mutex_trylock(self.native_handle()) }
        })
    }

    pub fn unlock(&self) -> Status {
        retry_transient("pthread_mutex_unlock", || {
            // SAFETY: handle points at an initialized kernel mutex.
            unsafe { libc::pthread_mutex_unlock(self.native_handle()) }
        })
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        let handle = self.native_handle();
        let status = retry_transient("pthread_mutex_destroy", || {
            // SAFETY: initialized in `init`, destroyed exactly once here.
            unsafe { libc::pthread_mutex_destroy(handle) }
        });
        if !status.is_ok() {
            fatal("pthread_mutex_destroy", status.code());
        }
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex")
            .field("handle", &self.native_handle())
            .finish()
    }
}

impl Lockable for RawMutex {
    fn lock(&self) -> Result<()> {
        match RawMutex::lock(self) {
            Status::Ok => Ok(()),
            status => Err(SyncError::lock("RawMutex::lock", status.code())),
        }
    }

    fn unlock(&self) {
        let status = RawMutex::unlock(self);
        if !status.is_ok() {
            fatal("RawMutex::unlock", status.code());
        }
    }

    fn try_lock(&self) -> bool {
        RawMutex::try_lock(self).is_ok()
    }
}

/// One kernel condition variable. Timed waits are measured against the
/// system (wall) clock, the only clock the kernel call understands.
pub struct RawCondvar {
    inner: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// SAFETY: the kernel object is designed to be shared between tasks.
unsafe impl Send for RawCondvar {}
// SAFETY: see above.
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    /// Initializes a kernel condition variable. On failure returns the
    /// positive status code.
    pub fn init() -> core::result::Result<Self, i32> {
        // SAFETY: all-zero storage is valid input for pthread_cond_init.
        let inner: Box<UnsafeCell<libc::pthread_cond_t>> =
            Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        let handle = inner.get();
        let status = retry_transient("pthread_cond_init", || {
            // SAFETY: storage is boxed and not yet initialized.
            unsafe { libc::pthread_cond_init(handle, std::ptr::null()) }
        });
        if status.is_ok() {
            log::trace!("kernel condvar initialized");
            Ok(Self { inner })
        } else {
            Err(status.code())
        }
    }

    #[must_use]
    pub fn native_handle(&self) -> *mut libc::pthread_cond_t {
        self.inner.get()
    }

    /// Blocks until signaled, releasing `mutex` for the duration.
    ///
    /// # Safety
    ///
    /// The calling task must hold `mutex`, and every concurrent waiter on
    /// this condition variable must use the same mutex.
    pub unsafe fn wait(&self, mutex: &RawMutex) -> Status {
        retry_transient("pthread_cond_wait", || {
            // SAFETY: both handles are initialized; caller holds `mutex`.
            unsafe { libc::pthread_cond_wait(self.native_handle(), mutex.native_handle()) }
        })
    }

    /// Blocks until signaled or the absolute system-clock `deadline` passes.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawCondvar::wait`].
    pub unsafe fn timed_wait(&self, mutex: &RawMutex, deadline: &Timespec) -> Status {
        let abstime = to_native(deadline);
        retry_transient("pthread_cond_timedwait", || {
            // SAFETY: both handles are initialized; caller holds `mutex`.
            unsafe {
                libc::pthread_cond_timedwait(
                    self.native_handle(),
                    mutex.native_handle(),
                    &abstime,
                )
            }
        })
    }

    pub fn signal(&self) -> Status {
        retry_transient("pthread_cond_signal", || {
            // SAFETY: handle points at an initialized kernel condvar.
            unsafe { libc::pthread_cond_signal(self.native_handle()) }
        })
    }

    pub fn broadcast(&self) -> Status {
        retry_transient("pthread_cond_broadcast", || {
            // SAFETY: handle points at an initialized kernel condvar.
            unsafe { libc::pthread_cond_broadcast(self.native_handle()) }
        })
    }
}

impl Drop for RawCondvar {
    fn drop(&mut self) {
        let handle = self.native_handle();
        let status = retry_transient("pthread_cond_destroy", || {
            // SAFETY: initialized in `init`, destroyed exactly once here.
            unsafe { libc::pthread_cond_destroy(handle) }
        });
        if !status.is_ok() {
            fatal("pthread_cond_destroy", status.code());
        }
    }
}

impl fmt::Debug for RawCondvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCondvar")
            .field("handle", &self.native_handle())
            .finish()
    }
}

fn init_typed(handle: *mut libc::pthread_mutex_t, attr_type: libc::c_int) -> Status {
    // SAFETY: all-zero storage is valid input for pthread_mutexattr_init.
    let mut attr: libc::pthread_mutexattr_t = unsafe { std::mem::zeroed() };
    // SAFETY: `attr` is a valid out-pointer.
    let status = Status::classify(unsafe { libc::pthread_mutexattr_init(&mut attr) });
    if !status.is_ok() {
        return status;
    }
    // SAFETY: `attr` was initialized above.
    let mut status = Status::classify(unsafe {
        libc::pthread_mutexattr_settype(&mut attr, attr_type)
    });
    if status.is_ok() {
        status = retry_transient("pthread_mutex_init", || {
            // SAFETY: `handle` is uninitialized boxed storage; `attr` is live.
            unsafe { libc::pthread_mutex_init(handle, &attr) }
        });
    }
    // SAFETY: `attr` was initialized and is destroyed exactly once.
    let destroyed = Status::classify(unsafe { libc::pthread_mutexattr_destroy(&mut attr) });
    if !destroyed.is_ok() {
        fatal("pthread_mutexattr_destroy", destroyed.code());
    }
    status
}

fn to_native(ts: &Timespec) -> libc::timespec {
    // SAFETY: all-zero is a valid `timespec`; fields are set below.
    let mut out: libc::timespec = unsafe { std::mem::zeroed() };
    out.tv_sec = libc::time_t::try_from(ts.tv_sec).unwrap_or(libc::time_t::MAX);
    out.tv_nsec = ts.tv_nsec as libc::c_long;
    out
}
