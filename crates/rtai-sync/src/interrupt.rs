//! Cooperative interruption of blocking waits.
//!
//! The kernel cannot cancel a task blocked in a condition wait, so
//! cancellation is cooperative. Every task owns an interruption record. A
//! condition wait arms a [`Checkpoint`] before blocking: it registers the
//! condition variable's auxiliary mutex and kernel condvar in the record so
//! [`InterruptHandle::interrupt`] can broadcast it. The wait consults the
//! record only after the caller's mutex has been reacquired, through
//! [`interruption_point`], so an interrupted wait still returns with the
//! lock held.
//!
//! Lock order is record lock, then checkpoint mutex, on both the arming and
//! the delivering side. A waiter releases the checkpoint mutex before it
//! takes the record lock to deregister.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex as RecordLock;

use crate::clock::Timespec;
use crate::error::{Result, SyncError, fatal};
use crate::kernel::{RawCondvar, RawMutex, Status};

/// Kernel objects a blocked task is waiting on.
#[derive(Clone, Copy)]
struct CheckpointTarget {
    mutex: NonNull<RawMutex>,
    cond: NonNull<RawCondvar>,
}

// SAFETY: the pointees are Sync kernel objects; the pointers are only
// dereferenced while the owning wait keeps them registered (and alive).
unsafe impl Send for CheckpointTarget {}

#[derive(Default)]
struct TaskInterrupt {
    requested: AtomicBool,
    checkpoint: RecordLock<Option<CheckpointTarget>>,
}

thread_local! {
    static CURRENT: Arc<TaskInterrupt> = Arc::new(TaskInterrupt::default());
    static DISABLE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

fn current_task() -> Arc<TaskInterrupt> {
    CURRENT.with(Arc::clone)
}

/// Handle through which other tasks can interrupt one task.
#[derive(Clone)]
pub struct InterruptHandle {
    task: Arc<TaskInterrupt>,
}

impl InterruptHandle {
    /// Requests that the task stop at its next interruption point. If it is
    /// blocked in a condition wait, that wait is woken.
    #[allow(unsafe_code)]
    pub fn interrupt(&self) {
        let checkpoint = self.task.checkpoint.lock();
        self.task.requested.store(true, Ordering::Release);
        if let Some(target) = *checkpoint {
            // SAFETY: the waiter deregisters under the record lock, which we
            // hold, before its wait returns; the objects are alive here.
            let (mutex, cond) = unsafe { (target.mutex.as_ref(), target.cond.as_ref()) };
            let locked = mutex.lock();
            if !locked.is_ok() {
                fatal("InterruptHandle::interrupt", locked.code());
            }
            let woke = cond.broadcast();
            let unlocked = mutex.unlock();
            if !woke.is_ok() || !unlocked.is_ok() {
                fatal("InterruptHandle::interrupt", woke.code().max(unlocked.code()));
            }
            log::debug!("interruption delivered to blocked wait");
        } else {
            log::debug!("interruption requested");
        }
    }

    /// Whether an interruption is pending (not yet consumed).
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.task.requested.load(Ordering::Acquire)
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("requested", &self.is_requested())
            .finish()
    }
}

/// Handle for the calling task.
#[must_use]
pub fn current() -> InterruptHandle {
    InterruptHandle {
        task: current_task(),
    }
}

/// False while a [`DisableInterruption`] guard is alive on this task.
#[must_use]
pub fn interruption_enabled() -> bool {
    DISABLE_DEPTH.with(Cell::get) == 0
}

/// Whether the calling task has a pending interruption.
#[must_use]
pub fn interruption_requested() -> bool {
    CURRENT.with(|task| task.requested.load(Ordering::Acquire))
}

/// Consumes a pending interruption of the calling task.
///
/// Returns `Err(SyncError::Interrupted)` when one was pending and
/// interruption is enabled.
pub fn interruption_point() -> Result<()> {
    if !interruption_enabled() {
        return Ok(());
    }
    let consumed = CURRENT.with(|task| task.requested.swap(false, Ordering::AcqRel));
    if consumed {
        log::debug!("interruption consumed at interruption point");
        return Err(SyncError::Interrupted);
    }
    Ok(())
}

/// Suppresses interruption on the calling task while alive. Nestable.
pub struct DisableInterruption {
    // Tied to the task whose depth it raised.
    _task_bound: PhantomData<*const ()>,
}

impl DisableInterruption {
    pub fn new() -> Self {
        DISABLE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _task_bound: PhantomData,
        }
    }
}

impl Default for DisableInterruption {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableInterruption {
    fn drop(&mut self) {
        DISABLE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl fmt::Debug for DisableInterruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisableInterruption").finish()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// A cancellable block on `cond`, entered with `mutex` held.
///
/// `arm` acquires `mutex` and, when interruption is enabled, registers the
/// pair with the calling task. Dropping releases `mutex` and deregisters, in
/// that order.
pub(crate) struct Checkpoint<'a> {
    mutex: &'a RawMutex,
    cond: &'a RawCondvar,
    registered: Option<Arc<TaskInterrupt>>,
    pending: bool,
}

impl<'a> Checkpoint<'a> {
    pub(crate) fn arm(mutex: &'a RawMutex, cond: &'a RawCondvar) -> Self {
        if !interruption_enabled() {
            lock_or_abort(mutex);
            return Self {
                mutex,
                cond,
                registered: None,
                pending: false,
            };
        }
        let task = current_task();
        let pending;
        {
            let mut slot = task.checkpoint.lock();
            pending = task.requested.load(Ordering::Acquire);
            if !pending {
                *slot = Some(CheckpointTarget {
                    mutex: NonNull::from(mutex),
                    cond: NonNull::from(cond),
                });
            }
            lock_or_abort(mutex);
        }
        Self {
            mutex,
            cond,
            registered: (!pending).then_some(task),
            pending,
        }
    }

    /// Blocks on the condition variable unless an interruption was already
    /// pending when the checkpoint was armed.
    #[allow(unsafe_code)]
    pub(crate) fn block(&self, deadline: Option<&Timespec>) -> Status {
        if self.pending {
            return Status::Ok;
        }
        // SAFETY: `arm` acquired `mutex`, and `cond` is only ever waited on
        // with this mutex.
        unsafe {
            match deadline {
                None => self.cond.wait(self.mutex),
                Some(deadline) => self.cond.timed_wait(self.mutex, deadline),
            }
        }
    }
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        let status = self.mutex.unlock();
        if !status.is_ok() {
            fatal("Checkpoint::drop", status.code());
        }
        if let Some(task) = self.registered.take() {
            *task.checkpoint.lock() = None;
        }
    }
}

fn lock_or_abort(mutex: &RawMutex) {
    let status = mutex.lock();
    if !status.is_ok() {
        fatal("Checkpoint::arm", status.code());
    }
}
