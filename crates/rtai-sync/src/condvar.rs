//! Condition variable paired with [`Mutex`].
//!
//! Every timed wait funnels into one absolute-deadline block on the system
//! clock ([`ConditionVariable::wait_until_timespec`]). Deadlines on other
//! clocks are re-anchored by [`clock::system_deadline_for`], and the
//! reported outcome is re-derived on the caller's own clock afterwards, so a
//! wall-clock jump during the wait cannot turn an early wake into a timeout
//! or the other way round.
//!
//! With the `interruptions` feature the block is a cancellation checkpoint:
//! the kernel wait happens on an auxiliary mutex registered with the calling
//! task, and the caller's mutex is released around it with a
//! [`ScopedUnlock`]. A delivered interruption is reported only after the
//! caller's mutex is held again.

use std::fmt;
use std::time::Duration;

use crate::clock::{self, Clock, SteadyClock, TimePoint, Timespec};
use crate::config;
use crate::error::{Result, SyncError, fatal};
use crate::guard::ScopedLock;
#[cfg(feature = "interruptions")]
use crate::guard::ScopedUnlock;
#[cfg(feature = "interruptions")]
use crate::interrupt::{self, Checkpoint};
#[cfg(feature = "interruptions")]
use crate::kernel::{MutexKind, RawMutex};
use crate::kernel::{RawCondvar, Status};
use crate::mutex::Mutex;

/// Whether a timed wait ended before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CvStatus {
    NoTimeout,
    Timeout,
}

impl CvStatus {
    #[must_use]
    pub const fn timed_out(self) -> bool {
        matches!(self, Self::Timeout)
    }
}

pub struct ConditionVariable {
    #[cfg(feature = "interruptions")]
    internal: RawMutex,
    cond: RawCondvar,
}

impl ConditionVariable {
    pub fn new() -> Result<Self> {
        let cond = RawCondvar::init()
            .map_err(|code| SyncError::resource("ConditionVariable::new", code))?;
        #[cfg(feature = "interruptions")]
        let internal = RawMutex::init(MutexKind::Normal)
            .map_err(|code| SyncError::resource("ConditionVariable::new", code))?;
        Ok(Self {
            #[cfg(feature = "interruptions")]
            internal,
            cond,
        })
    }

    /// Releases the guarded mutex, blocks until notified, and reacquires the
    /// mutex before returning on every path. Spurious wakeups are possible.
    pub fn wait(&self, lock: &mut ScopedLock<'_, Mutex>) -> Result<()> {
        const OP: &str = "ConditionVariable::wait";
        self.ensure_owned(lock, OP)?;
        let status = self.block(lock.lockable(), None);
        Self::finish(OP, status).map(|_| ())
    }

    /// Waits until `pred` holds. `pred` is evaluated with the mutex held.
    pub fn wait_pred<P>(&self, lock: &mut ScopedLock<'_, Mutex>, mut pred: P) -> Result<()>
    where
        P: FnMut() -> bool,
    {
        while !pred() {
            self.wait(lock)?;
        }
        Ok(())
    }

    /// Raw absolute-deadline wait on the system clock. Returns `true` when
    /// woken before `deadline`, `false` on timeout.
    pub fn wait_until_timespec(
        &self,
        lock: &mut ScopedLock<'_, Mutex>,
        deadline: &Timespec,
    ) -> Result<bool> {
        const OP: &str = "ConditionVariable::wait_until";
        self.ensure_owned(lock, OP)?;
        self.block_until(lock, deadline, OP)
    }

    /// Waits until notified or until `deadline` passes on clock `C`.
    pub fn wait_until<C: Clock>(
        &self,
        lock: &mut ScopedLock<'_, Mutex>,
        deadline: TimePoint<C>,
    ) -> Result<CvStatus> {
        const OP: &str = "ConditionVariable::wait_until";
        self.ensure_owned(lock, OP)?;
        if deadline.has_passed() {
            return Ok(CvStatus::Timeout);
        }
        let system_deadline = clock::system_deadline_for(deadline);
        self.block_until(lock, &system_deadline, OP)?;
        Ok(if C::now() < deadline {
            CvStatus::NoTimeout
        } else {
            CvStatus::Timeout
        })
    }

    /// Waits until notified or until `timeout` has elapsed on the steady
    /// clock.
    pub fn wait_for(
        &self,
        lock: &mut ScopedLock<'_, Mutex>,
        timeout: Duration,
    ) -> Result<CvStatus> {
        const OP: &str = "ConditionVariable::wait_for";
        self.ensure_owned(lock, OP)?;
        if timeout.is_zero() {
            return Ok(CvStatus::Timeout);
        }
        let start = SteadyClock::now();
        let system_deadline = clock::system_deadline_after(timeout);
        self.block_until(lock, &system_deadline, OP)?;
        Ok(if start.elapsed() < timeout {
            CvStatus::NoTimeout
        } else {
            CvStatus::Timeout
        })
    }

    /// Waits until `pred` holds or `deadline` passes; returns `pred`'s value
    /// at exit.
    pub fn wait_until_pred<C, P>(
        &self,
        lock: &mut ScopedLock<'_, Mutex>,
        deadline: TimePoint<C>,
        mut pred: P,
    ) -> Result<bool>
    where
        C: Clock,
        P: FnMut() -> bool,
    {
        while !pred() {
            if self.wait_until(lock, deadline)?.timed_out() {
                return Ok(pred());
            }
        }
        Ok(true)
    }

    /// Relative form of [`ConditionVariable::wait_until_pred`], measured on
    /// the steady clock.
    pub fn wait_for_pred<P>(
        &self,
        lock: &mut ScopedLock<'_, Mutex>,
        timeout: Duration,
        pred: P,
    ) -> Result<bool>
    where
        P: FnMut() -> bool,
    {
        self.wait_until_pred(lock, SteadyClock::now() + timeout, pred)
    }

    /// Wakes at most one waiter.
    pub fn notify_one(&self) {
        self.notify("ConditionVariable::notify_one", RawCondvar::signal);
    }

    /// Wakes every waiter.
    pub fn notify_all(&self) {
        self.notify("ConditionVariable::notify_all", RawCondvar::broadcast);
    }

    #[must_use]
    pub fn native_handle(&self) -> *mut libc::pthread_cond_t {
        self.cond.native_handle()
    }

    fn notify(&self, op: &'static str, wake: fn(&RawCondvar) -> Status) {
        #[cfg(feature = "interruptions")]
        let _internal = ScopedLock::new(&self.internal).unwrap_or_else(|err| fatal(op, err.code()));
        let status = wake(&self.cond);
        if !status.is_ok() {
            fatal(op, status.code());
        }
    }

    fn ensure_owned(&self, lock: &ScopedLock<'_, Mutex>, op: &'static str) -> Result<()> {
        if config::check_level().checks_enabled() && !lock.owns_lock() {
            log::warn!("{op}: called without holding the mutex");
            return Err(SyncError::Precondition { op });
        }
        Ok(())
    }

    /// Timed block on the system clock. Ownership has already been checked.
    fn block_until(
        &self,
        lock: &ScopedLock<'_, Mutex>,
        deadline: &Timespec,
        op: &'static str,
    ) -> Result<bool> {
        let status = self.block(lock.lockable(), Some(deadline));
        Self::finish(op, status)
    }

    #[cfg(feature = "interruptions")]
    fn block(&self, mutex: &Mutex, deadline: Option<&Timespec>) -> Status {
        let checkpoint = Checkpoint::arm(&self.internal, &self.cond);
        let relock = ScopedUnlock::new(mutex);
        let status = checkpoint.block(deadline);
        // Internal mutex first: notifiers take it while holding `mutex`.
        drop(checkpoint);
        drop(relock);
        status
    }

    #[cfg(not(feature = "interruptions"))]
    #[allow(unsafe_code)]
    fn block(&self, mutex: &Mutex, deadline: Option<&Timespec>) -> Status {
        // SAFETY: the caller's guard owns `mutex` (checked or by contract),
        // and the kernel reacquires it before returning.
        unsafe {
            match deadline {
                None => self.cond.wait(&mutex.raw),
                Some(deadline) => self.cond.timed_wait(&mutex.raw, deadline),
            }
        }
    }

    /// Maps the block's status once the caller's mutex is held again.
    fn finish(op: &'static str, status: Status) -> Result<bool> {
        #[cfg(feature = "interruptions")]
        interrupt::interruption_point()?;
        match status {
            Status::Ok => Ok(true),
            Status::TimedOut => Ok(false),
            other => Err(SyncError::lock(op, other.code())),
        }
    }
}

impl fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionVariable").finish_non_exhaustive()
    }
}
