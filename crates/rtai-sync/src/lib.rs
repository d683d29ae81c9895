//! Locking primitives over a real-time kernel's POSIX-compatible layer.
//!
//! Tasks that run under the real-time kernel need the usual mutex and
//! condition-variable vocabulary, but built on the kernel's own objects
//! rather than the host threading library. This crate provides that
//! vocabulary and hides the kernel's quirks (transient interruption of
//! blocking calls, sign conventions of status codes, the single clock its
//! timed waits understand).
//!
//! # Architecture
//!
//! - **Kernel boundary** (`kernel`): raw kernel objects, status
//!   classification, the bounded transient-retry wrapper, task identity
//! - **Clocks** (`clock`): clock domains and conversion to absolute
//!   system-clock deadlines
//! - **Mutex** (`mutex`): exclusive, non-reentrant lock
//! - **Recursive mutex** (`recursive`): reentrant lock with native and
//!   hand-built backends
//! - **Condition variable** (`condvar`): waits, timed waits, notification
//! - **Guards** (`guard`): `ScopedLock` / `ScopedUnlock`
//! - **Shared mutex** (`shared`): reader/writer lock with writer preference
//! - **Interruption** (`interrupt`): cooperative cancellation of waits
//! - **Configuration** (`config`): runtime check level and retry bound

#![deny(unsafe_code)]

pub mod clock;
pub mod condvar;
pub mod config;
pub mod error;
pub mod guard;
#[cfg(feature = "interruptions")]
#[allow(unsafe_code)]
pub mod interrupt;
#[allow(unsafe_code)]
pub mod kernel;
pub mod mutex;
pub mod recursive;
pub mod shared;

pub use clock::{Clock, SteadyClock, SystemClock, TimePoint, Timespec};
pub use condvar::{ConditionVariable, CvStatus};
pub use config::{CheckLevel, SyncConfig};
pub use error::{Result, SyncError};
pub use guard::{Lockable, ScopedLock, ScopedUnlock};
pub use mutex::{Mutex, TryMutex};
pub use recursive::{RecursiveBackendKind, RecursiveMutex, RecursiveTryMutex};
pub use shared::{SharedLock, SharedMutex};
