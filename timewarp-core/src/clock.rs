//! ## timewarp-core::clock
//! **Virtual time value and the arithmetic around it**
//!
//! The clock is a millisecond counter mirrored in an atomic so `now_ms` never
//! blocks. Writes happen only while the scheduler's core lock is held.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::TimeError;

/// Largest accepted sub-millisecond component of a timeout.
pub const MAX_NANOS: i32 = 999_999;

#[derive(Clone, Default)]
pub struct VirtualClock {
    millis: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Current virtual time in milliseconds.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }

    /// Fails when `instant` lies before the current time.
    pub fn check_target(&self, instant: u64) -> Result<u64, TimeError> {
        let now = self.now_ms();
        if instant < now {
            return Err(TimeError::InvalidArgument(format!(
                "time cannot be decreased, current={now}, new={instant}"
            )));
        }
        Ok(instant)
    }

    /// Target instant of `advance(delta)`, saturating at `u64::MAX`.
    pub fn advance_target(&self, delta: i64) -> Result<u64, TimeError> {
        if delta < 0 {
            return Err(TimeError::InvalidArgument(format!(
                "time delta is negative: {delta}"
            )));
        }
        Ok(self.now_ms().saturating_add(delta as u64))
    }

    #[inline]
    pub(crate) fn store(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }
}

/// Virtual instant at which a suspended thread becomes due.
///
/// `At` sorts before `Never`, so indefinite waits stay at the back of the
/// ordering and no clock value ever makes them due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    At(u64),
    Never,
}

impl Deadline {
    /// `now + millis`, or `Never` when that instant is not representable.
    pub fn after(now: u64, millis: u64) -> Self {
        now.checked_add(millis).map_or(Deadline::Never, Deadline::At)
    }

    #[inline]
    pub fn is_due(self, now: u64) -> bool {
        matches!(self, Deadline::At(instant) if instant <= now)
    }
}

/// Validates a `(millis, nanos)` timeout and folds the nanosecond part into
/// whole milliseconds: one extra millisecond when `nanos >= 500_000`, or when
/// the timeout is sub-millisecond but non-zero.
pub fn effective_millis(millis: i64, nanos: i32) -> Result<u64, TimeError> {
    if millis < 0 {
        return Err(TimeError::InvalidArgument(
            "timeout value is negative".into(),
        ));
    }
    if !(0..=MAX_NANOS).contains(&nanos) {
        return Err(TimeError::InvalidArgument(
            "nanosecond timeout value out of range".into(),
        ));
    }
    let mut millis = millis as u64;
    if nanos >= 500_000 || (nanos != 0 && millis == 0) {
        millis += 1;
    }
    Ok(millis)
}

/// Splits a nanosecond count into whole milliseconds and the remainder.
pub fn split_nanos(nanos: i64) -> (i64, i32) {
    (nanos / 1_000_000, (nanos % 1_000_000) as i32)
}
