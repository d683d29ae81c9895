//! Boundary to the kernel's POSIX-compatible primitive layer.
//!
//! Everything that talks to the kernel lives here: the raw mutex and
//! condition-variable objects ([`posix`]), status classification, the single
//! transient-retry wrapper applied at every call site, task identity, and
//! clock reads. The primitives in the rest of the crate only see [`Status`].
//!
//! The real-time kernel's POSIX layer reports some statuses as negative codes
//! (`-EBUSY` from trylock in particular) where a host libc returns the
//! positive errno. [`Status::classify`] folds the sign so both conventions
//! land on the same variant.

pub mod posix;

use std::ffi::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use posix::{MutexKind, RawCondvar, RawMutex};

use crate::config;
use crate::error::fatal;

/// Classified result of one kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    /// Object currently held (trylock).
    Busy,
    /// Call was interrupted before completing and may be reissued.
    Transient,
    /// Absolute deadline passed (timedwait).
    TimedOut,
    /// Any other status, as a positive errno value.
    Failed(c_int),
}

impl Status {
    /// Maps a raw kernel return value, accepting either sign convention.
    #[must_use]
    pub const fn classify(rc: c_int) -> Self {
        if rc == 0 {
            return Self::Ok;
        }
        let code = if rc < 0 { rc.wrapping_neg() } else { rc };
        match code {
            libc::EBUSY => Self::Busy,
            libc::EINTR => Self::Transient,
            libc::ETIMEDOUT => Self::TimedOut,
            _ => Self::Failed(code),
        }
    }

    /// Positive errno-style code; 0 for `Ok`.
    #[must_use]
    pub const fn code(self) -> c_int {
        match self {
            Self::Ok => 0,
            Self::Busy => libc::EBUSY,
            Self::Transient => libc::EINTR,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::Failed(code) => code,
        }
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

// ---------------------------------------------------------------------------
// Transient retry
// ---------------------------------------------------------------------------

static TRANSIENT_RETRIES: AtomicU64 = AtomicU64::new(0);
static RETRY_EXHAUSTIONS: AtomicU64 = AtomicU64::new(0);

/// Reissues `call` while it reports a transient interrupt, up to the
/// configured bound ([`config::retry_limit`]).
pub fn retry_transient(op: &'static str, call: impl FnMut() -> c_int) -> Status {
    retry_bounded(op, config::retry_limit(), call)
}

/// Reissues `call` while it reports a transient interrupt, at most `limit`
/// extra times. A transient status that outlives the bound is escalated as
/// `Failed(EINTR)`.
pub fn retry_bounded(op: &'static str, limit: u32, mut call: impl FnMut() -> c_int) -> Status {
    let mut retries = 0_u32;
    loop {
        let status = Status::classify(call());
        if status != Status::Transient {
            return status;
        }
        if retries >= limit {
            RETRY_EXHAUSTIONS.fetch_add(1, Ordering::Relaxed);
            log::warn!("{op}: still interrupted after {limit} retries, giving up");
            return Status::Failed(libc::EINTR);
        }
        retries += 1;
        TRANSIENT_RETRIES.fetch_add(1, Ordering::Relaxed);
        log::trace!("{op}: transient interrupt, retry {retries}");
    }
}

/// Snapshot of (transient retries absorbed, retry bounds exhausted).
#[doc(hidden)]
#[must_use]
pub fn retry_counters() -> (u64, u64) {
    (
        TRANSIENT_RETRIES.load(Ordering::Relaxed),
        RETRY_EXHAUSTIONS.load(Ordering::Relaxed),
    )
}

// ---------------------------------------------------------------------------
// Task identity and clocks
// ---------------------------------------------------------------------------

/// Identity of a kernel task, comparable across tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// The calling task.
    #[must_use]
    pub fn current() -> Self {
        // SAFETY: pthread_self has no preconditions and always succeeds.
        let raw = unsafe { libc::pthread_self() };
        Self(raw as u64)
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Reads `clock` as a duration since that clock's epoch.
pub(crate) fn clock_now(clock: libc::clockid_t) -> Duration {
    // SAFETY: all-zero is a valid `timespec`.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid, writable out-pointer for the call.
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        fatal("clock_gettime", errno);
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u32::try_from(ts.tv_nsec).unwrap_or(0);
    Duration::new(secs, nanos)
}
