//! Park permits.
//!
//! An `unpark` aimed at a thread that is not parked is remembered here, so
//! that thread's next `park` returns at once. Permits do not accumulate.

use std::collections::HashSet;
use std::thread::ThreadId;

#[derive(Debug, Default)]
pub struct ParkTable {
    permits: HashSet<ThreadId>,
}

impl ParkTable {
    pub fn grant(&mut self, thread: ThreadId) {
        self.permits.insert(thread);
    }

    /// Consumes the permit of `thread`, reporting whether there was one.
    pub fn take(&mut self, thread: ThreadId) -> bool {
        self.permits.remove(&thread)
    }

    pub fn clear(&mut self) {
        self.permits.clear();
    }
}
