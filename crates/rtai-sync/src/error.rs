//! Error taxonomy for the synchronization primitives.
//!
//! Kernel statuses that a caller can act on surface as [`SyncError`]. A timed
//! wait running out is a normal outcome ([`crate::condvar::CvStatus`]), never
//! an error. Corruption of a primitive (unlock or destroy failing, internal
//! bookkeeping failing) has no recoverable path and goes through [`fatal`].

use thiserror::Error;

/// Failure of a synchronization operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncError {
    /// Kernel object creation failed (resource exhaustion).
    #[error("{op}: kernel object creation failed (status {code})")]
    Resource { op: &'static str, code: i32 },
    /// An operation on an owned lock, or a wait, failed unexpectedly.
    /// The primitive should be treated as unusable afterwards.
    #[error("{op}: lock operation failed (status {code})")]
    Lock { op: &'static str, code: i32 },
    /// A wait was issued through a guard that does not own its mutex.
    #[error("{op}: precondition failed, mutex not owned")]
    Precondition { op: &'static str },
    /// The calling task was asked to stop while blocked.
    #[cfg(feature = "interruptions")]
    #[error("blocking wait interrupted")]
    Interrupted,
}

impl SyncError {
    pub(crate) const fn resource(op: &'static str, code: i32) -> Self {
        Self::Resource { op, code }
    }

    pub(crate) const fn lock(op: &'static str, code: i32) -> Self {
        Self::Lock { op, code }
    }

    /// errno-style code for this error.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Resource { code, .. } | Self::Lock { code, .. } => *code,
            Self::Precondition { .. } => libc::EPERM,
            #[cfg(feature = "interruptions")]
            Self::Interrupted => libc::EINTR,
        }
    }

    /// Returns true for the interruption outcome of a cancellable wait.
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        match self {
            #[cfg(feature = "interruptions")]
            Self::Interrupted => true,
            _ => false,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, SyncError>;

/// Terminates the process after a kernel call that must not fail did.
///
/// Used for unlock/destroy failures and internal bookkeeping calls. The
/// primitive is corrupt at this point and no caller can recover it.
#[cold]
pub(crate) fn fatal(op: &'static str, code: i32) -> ! {
    log::error!("{op}: unrecoverable kernel status {code}, aborting");
    std::process::abort()
}
