//! Monitors: the handles threads wait on and notify.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Condvar;

/// Opaque identity of a [`Monitor`], assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonitorId(u64);

impl MonitorId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        MonitorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wait/notify handle paired with a user `parking_lot::Mutex`.
///
/// Under a virtual clock, waiters are tracked by the scheduler; in passthrough
/// mode the embedded condvar is used directly.
pub struct Monitor {
    id: MonitorId,
    condvar: Condvar,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            id: MonitorId::next(),
            condvar: Condvar::new(),
        }
    }

    pub fn id(&self) -> MonitorId {
        self.id
    }

    pub(crate) fn condvar(&self) -> &Condvar {
        &self.condvar
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").field("id", &self.id).finish()
    }
}
