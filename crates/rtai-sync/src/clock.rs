//! Clock domains and absolute deadlines.
//!
//! The kernel's timed wait takes one representation of time: an absolute
//! [`Timespec`] on the system (wall) clock. Callers may express deadlines on
//! any [`Clock`]; the helpers here translate them into that representation.
//! A deadline on another clock is re-anchored to "system now plus the
//! remaining time on the requested clock", rounded up so a wait never ends
//! early because of the conversion.

use std::marker::PhantomData;
use std::ops::{Add, Sub};
use std::time::Duration;

use crate::kernel;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Seconds + nanoseconds since a clock's epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    /// Seconds.
    pub tv_sec: i64,
    /// Nanoseconds (0 to 999_999_999).
    pub tv_nsec: i64,
}

impl Timespec {
    pub const ZERO: Self = Self {
        tv_sec: 0,
        tv_nsec: 0,
    };
    /// Latest representable instant; used when a deadline overflows.
    pub const MAX: Self = Self {
        tv_sec: i64::MAX,
        tv_nsec: NANOS_PER_SEC - 1,
    };

    #[must_use]
    pub fn from_duration(d: Duration) -> Self {
        match i64::try_from(d.as_secs()) {
            Ok(tv_sec) => Self {
                tv_sec,
                tv_nsec: i64::from(d.subsec_nanos()),
            },
            Err(_) => Self::MAX,
        }
    }

    /// Duration since the epoch; instants before it clamp to zero.
    #[must_use]
    pub fn to_duration(self) -> Duration {
        if self.tv_sec < 0 || !self.is_normalized() {
            return Duration::ZERO;
        }
        Duration::new(self.tv_sec as u64, self.tv_nsec as u32)
    }

    /// Returns true when `tv_nsec` lies in `0..1_000_000_000`.
    #[must_use]
    pub const fn is_normalized(self) -> bool {
        self.tv_nsec >= 0 && self.tv_nsec < NANOS_PER_SEC
    }

    /// `self + d`, saturating at [`Timespec::MAX`].
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let Ok(secs) = i64::try_from(d.as_secs()) else {
            return Self::MAX;
        };
        let mut nsec = self.tv_nsec + i64::from(d.subsec_nanos());
        let mut carry = 0;
        if nsec >= NANOS_PER_SEC {
            nsec -= NANOS_PER_SEC;
            carry = 1;
        }
        match self
            .tv_sec
            .checked_add(secs)
            .and_then(|s| s.checked_add(carry))
        {
            Some(tv_sec) => Self {
                tv_sec,
                tv_nsec: nsec,
            },
            None => Self::MAX,
        }
    }
}

/// A clock domain the timed waits can be expressed in.
pub trait Clock:
    Copy + Clone + std::fmt::Debug + PartialEq + Eq + PartialOrd + Ord + std::hash::Hash + 'static
{
    /// True for the clock the kernel measures timed waits against.
    const IS_SYSTEM: bool;

    /// Current reading as a duration since this clock's epoch.
    fn now_since_epoch() -> Duration;

    fn now() -> TimePoint<Self> {
        TimePoint::from_since_epoch(Self::now_since_epoch())
    }
}

/// Wall clock (`CLOCK_REALTIME`). May jump when the system time is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemClock;

impl Clock for SystemClock {
    const IS_SYSTEM: bool = true;

    fn now_since_epoch() -> Duration {
        kernel::clock_now(libc::CLOCK_REALTIME)
    }
}

/// Monotonic clock (`CLOCK_MONOTONIC`). Never jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SteadyClock;

impl Clock for SteadyClock {
    const IS_SYSTEM: bool = false;

    fn now_since_epoch() -> Duration {
        kernel::clock_now(libc::CLOCK_MONOTONIC)
    }
}

/// An instant on clock `C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint<C: Clock> {
    since_epoch: Duration,
    clock: PhantomData<C>,
}

impl<C: Clock> TimePoint<C> {
    #[must_use]
    pub const fn from_since_epoch(since_epoch: Duration) -> Self {
        Self {
            since_epoch,
            clock: PhantomData,
        }
    }

    #[must_use]
    pub const fn since_epoch(self) -> Duration {
        self.since_epoch
    }

    /// Time from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.since_epoch.saturating_sub(earlier.since_epoch)
    }

    /// Time left until `self` on clock `C`, zero once it has passed.
    #[must_use]
    pub fn remaining(self) -> Duration {
        self.saturating_duration_since(C::now())
    }

    /// Time since `self` on clock `C`, zero if `self` is in the future.
    #[must_use]
    pub fn elapsed(self) -> Duration {
        C::now().saturating_duration_since(self)
    }

    #[must_use]
    pub fn has_passed(self) -> bool {
        C::now() >= self
    }

    #[must_use]
    pub fn checked_add(self, d: Duration) -> Option<Self> {
        self.since_epoch.checked_add(d).map(Self::from_since_epoch)
    }

    #[must_use]
    pub fn to_timespec(self) -> Timespec {
        Timespec::from_duration(self.since_epoch)
    }
}

impl<C: Clock> Add<Duration> for TimePoint<C> {
    type Output = Self;

    /// Saturates at the largest representable instant.
    fn add(self, d: Duration) -> Self {
        Self::from_since_epoch(self.since_epoch.saturating_add(d))
    }
}

impl<C: Clock> Sub<TimePoint<C>> for TimePoint<C> {
    type Output = Duration;

    fn sub(self, earlier: Self) -> Duration {
        self.saturating_duration_since(earlier)
    }
}

/// Absolute system-clock deadline `d` from now.
#[must_use]
pub fn system_deadline_after(d: Duration) -> Timespec {
    SystemClock::now().to_timespec().saturating_add(d)
}

/// Absolute system-clock deadline corresponding to `deadline` on clock `C`.
#[must_use]
pub fn system_deadline_for<C: Clock>(deadline: TimePoint<C>) -> Timespec {
    if C::IS_SYSTEM {
        return deadline.to_timespec();
    }
    let system_now = SystemClock::now();
    let remaining = deadline.remaining();
    system_now.to_timespec().saturating_add(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timespec_add_carries_nanoseconds() {
        let ts = Timespec {
            tv_sec: 10,
            tv_nsec: 900_000_000,
        };
        let sum = ts.saturating_add(Duration::from_millis(250));
        assert_eq!(
            sum,
            Timespec {
                tv_sec: 11,
                tv_nsec: 150_000_000
            }
        );
        assert!(sum.is_normalized());
    }

    #[test]
    fn timespec_add_saturates() {
        let near_max = Timespec {
            tv_sec: i64::MAX,
            tv_nsec: 500_000_000,
        };
        assert_eq!(
            near_max.saturating_add(Duration::from_millis(600)),
            Timespec::MAX
        );
        assert_eq!(Timespec::ZERO.saturating_add(Duration::MAX), Timespec::MAX);
    }

    #[test]
    fn timespec_duration_conversion() {
        let d = Duration::new(42, 7);
        let ts = Timespec::from_duration(d);
        assert_eq!(ts.tv_sec, 42);
        assert_eq!(ts.tv_nsec, 7);
        assert_eq!(ts.to_duration(), d);
        assert_eq!(
            Timespec {
                tv_sec: -1,
                tv_nsec: 0
            }
            .to_duration(),
            Duration::ZERO
        );
        assert_eq!(Timespec::from_duration(Duration::MAX), Timespec::MAX);
    }

    #[test]
    fn time_point_arithmetic_saturates() {
        let a = TimePoint::<SteadyClock>::from_since_epoch(Duration::from_secs(5));
        let b = a + Duration::from_secs(3);
        assert_eq!(b - a, Duration::from_secs(3));
        assert_eq!(a - b, Duration::ZERO);
        assert_eq!((a + Duration::MAX).since_epoch(), Duration::MAX);
        assert!(a.checked_add(Duration::MAX).is_none());
    }

    #[test]
    fn past_and_future_points() {
        let past = SteadyClock::now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(past.has_passed());
        assert_eq!(past.remaining(), Duration::ZERO);
        assert!(past.elapsed() >= Duration::from_millis(2));

        let future = SteadyClock::now() + Duration::from_secs(60);
        assert!(!future.has_passed());
        assert!(future.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn steady_deadline_maps_into_system_time() {
        let before = SystemClock::now().to_timespec();
        let deadline = SteadyClock::now() + Duration::from_secs(2);
        let mapped = system_deadline_for(deadline);
        let after = SystemClock::now().to_timespec();
        assert!(mapped > before.saturating_add(Duration::from_millis(1500)));
        assert!(mapped <= after.saturating_add(Duration::from_secs(2)));
    }

    #[test]
    fn system_deadline_is_passed_through() {
        let deadline = SystemClock::now() + Duration::from_secs(1);
        assert_eq!(system_deadline_for(deadline), deadline.to_timespec());
    }

    #[test]
    fn relative_deadline_is_in_the_future() {
        let now = SystemClock::now().to_timespec();
        let deadline = system_deadline_after(Duration::from_millis(100));
        assert!(deadline > now);
    }
}
