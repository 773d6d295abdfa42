//! ## timewarp-core::registry
//! **Suspended waits, ordered by resume deadline**
//!
//! Every suspending call owns a private [`Waiter`]. The registry only keeps
//! bookkeeping: the deadline ordering, the FIFO of waiters per monitor and the
//! single wait a thread can be in. All methods run under the scheduler's core
//! lock; blocking on a `Waiter` happens outside it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

use crate::clock::Deadline;
use crate::monitor::MonitorId;

/// Registration order of a wait. Breaks deadline ties first-in first-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Sleep,
    Monitor,
    Park,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Signaled,
    Interrupted,
}

#[derive(Default)]
struct WakeFlags {
    signaled: bool,
    interrupted: bool,
}

/// Private synchronization handle of one wait call.
#[derive(Default)]
pub struct Waiter {
    flags: Mutex<WakeFlags>,
    cvar: Condvar,
}

impl Waiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        self.flags.lock().signaled = true;
        self.cvar.notify_one();
    }

    pub fn interrupt(&self) {
        self.flags.lock().interrupted = true;
        self.cvar.notify_one();
    }

    /// Blocks until signaled or interrupted. Interruption wins when both are set.
    pub fn block(&self) -> Wakeup {
        let mut flags = self.flags.lock();
        while !flags.signaled && !flags.interrupted {
            self.cvar.wait(&mut flags);
        }
        if flags.interrupted {
            Wakeup::Interrupted
        } else {
            Wakeup::Signaled
        }
    }

    /// Forgets a signal that was not backed by a resumption.
    pub fn clear_signal(&self) {
        self.flags.lock().signaled = false;
    }
}

pub struct WaitEntry {
    pub thread: ThreadId,
    pub kind: WaitKind,
    pub monitor: Option<MonitorId>,
    pub deadline: Deadline,
    pub resumed: bool,
    /// Set once an interrupt reached this wait; the owner will fail it.
    pub interrupted: bool,
    pub waiter: Arc<Waiter>,
}

#[derive(Default)]
pub struct WaitRegistry {
    next_key: u64,
    entries: HashMap<WaitKey, WaitEntry>,
    due: BTreeSet<(Deadline, WaitKey)>,
    monitors: HashMap<MonitorId, VecDeque<WaitKey>>,
    threads: HashMap<ThreadId, WaitKey>,
}

impl WaitRegistry {
    pub fn insert(
        &mut self,
        thread: ThreadId,
        kind: WaitKind,
        monitor: Option<MonitorId>,
        deadline: Deadline,
        waiter: Arc<Waiter>,
    ) -> WaitKey {
        let key = WaitKey(self.next_key);
        self.next_key += 1;

        self.due.insert((deadline, key));
        if let Some(monitor) = monitor {
            self.monitors.entry(monitor).or_default().push_back(key);
        }
        let previous = self.threads.insert(thread, key);
        assert!(
            previous.is_none(),
            "thread {thread:?} registered a second wait while already suspended"
        );
        self.entries.insert(
            key,
            WaitEntry {
                thread,
                kind,
                monitor,
                deadline,
                resumed: false,
                interrupted: false,
                waiter,
            },
        );
        key
    }

    /// Earliest unresumed wait whose deadline has passed.
    pub fn next_due(&self, now: u64) -> Option<WaitKey> {
        self.due
            .first()
            .filter(|(deadline, _)| deadline.is_due(now))
            .map(|&(_, key)| key)
    }

    /// Deadline of the earliest unresumed wait, `Never` included.
    pub fn earliest_deadline(&self) -> Option<Deadline> {
        self.due.first().map(|&(deadline, _)| deadline)
    }

    /// Marks a wait resumed and detaches it from the ordering and its monitor.
    /// Returns the handle to wake, or `None` when someone else got there first.
    pub fn mark_resumed(&mut self, key: WaitKey) -> Option<Arc<Waiter>> {
        let entry = self.entries.get_mut(&key)?;
        if entry.resumed || entry.interrupted {
            return None;
        }
        entry.resumed = true;
        let (deadline, monitor, waiter) = (entry.deadline, entry.monitor, entry.waiter.clone());
        self.detach(key, deadline, monitor);
        Some(waiter)
    }

    /// Flags a wait interrupted, resumed or not, and detaches it so no later
    /// clock move or signal picks it. `None` if it was interrupted already.
    pub fn mark_interrupted(&mut self, key: WaitKey) -> Option<Arc<Waiter>> {
        let entry = self.entries.get_mut(&key)?;
        if entry.interrupted {
            return None;
        }
        entry.interrupted = true;
        let (deadline, monitor, waiter) = (entry.deadline, entry.monitor, entry.waiter.clone());
        self.detach(key, deadline, monitor);
        Some(waiter)
    }

    /// Removes a wait from every index. Called by the waiting thread itself.
    pub fn remove(&mut self, key: WaitKey) -> Option<WaitEntry> {
        let entry = self.entries.remove(&key)?;
        self.detach(key, entry.deadline, entry.monitor);
        if self.threads.get(&entry.thread) == Some(&key) {
            self.threads.remove(&entry.thread);
        }
        Some(entry)
    }

    fn detach(&mut self, key: WaitKey, deadline: Deadline, monitor: Option<MonitorId>) {
        self.due.remove(&(deadline, key));
        if let Some(monitor) = monitor {
            if let Some(queue) = self.monitors.get_mut(&monitor) {
                queue.retain(|k| *k != key);
                if queue.is_empty() {
                    self.monitors.remove(&monitor);
                }
            }
        }
    }

    pub fn contains(&self, key: WaitKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get(&self, key: WaitKey) -> Option<&WaitEntry> {
        self.entries.get(&key)
    }

    /// Unresumed waiters of a monitor in registration order.
    pub fn monitor_waiters(&self, monitor: MonitorId) -> Vec<WaitKey> {
        self.monitors
            .get(&monitor)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn wait_of(&self, thread: ThreadId) -> Option<WaitKey> {
        self.threads.get(&thread).copied()
    }

    pub fn park_of(&self, thread: ThreadId) -> Option<WaitKey> {
        self.wait_of(thread)
            .filter(|key| matches!(self.entries.get(key), Some(e) if e.kind == WaitKind::Park))
    }

    /// Resumes every registered wait at once, without ordering.
    pub fn resume_all(&mut self) -> Vec<Arc<Waiter>> {
        let keys: Vec<WaitKey> = self.entries.keys().copied().collect();
        keys.into_iter()
            .filter_map(|key| self.mark_resumed(key))
            .collect()
    }

    /// Threads split into (suspended, woken but not yet back from the wait).
    pub fn thread_states(&self) -> (HashSet<ThreadId>, HashSet<ThreadId>) {
        let mut suspended = HashSet::new();
        let mut waking = HashSet::new();
        for entry in self.entries.values() {
            if entry.resumed || entry.interrupted {
                waking.insert(entry.thread);
            } else {
                suspended.insert(entry.thread);
            }
        }
        (suspended, waking)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other_thread() -> ThreadId {
        std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap()
    }

    #[test]
    fn due_order_is_deadline_then_fifo() {
        let mut registry = WaitRegistry::default();
        let (a, b, c) = (other_thread(), other_thread(), other_thread());
        let late = registry.insert(a, WaitKind::Sleep, None, Deadline::At(20), Waiter::new());
        let first = registry.insert(b, WaitKind::Sleep, None, Deadline::At(10), Waiter::new());
        let second = registry.insert(c, WaitKind::Sleep, None, Deadline::At(10), Waiter::new());

        assert_eq!(registry.earliest_deadline(), Some(Deadline::At(10)));
        assert_eq!(registry.next_due(9), None);
        assert_eq!(registry.next_due(10), Some(first));
        registry.mark_resumed(first).unwrap();
        assert_eq!(registry.next_due(10), Some(second));
        registry.mark_resumed(second).unwrap();
        assert_eq!(registry.next_due(10), None);
        assert_eq!(registry.next_due(20), Some(late));
    }

    #[test]
    fn mark_resumed_is_first_writer_wins() {
        let mut registry = WaitRegistry::default();
        let monitor = MonitorId::next();
        let key = registry.insert(
            other_thread(),
            WaitKind::Monitor,
            Some(monitor),
            Deadline::Never,
            Waiter::new(),
        );

        assert!(registry.mark_resumed(key).is_some());
        assert!(registry.mark_resumed(key).is_none());
        assert!(registry.monitor_waiters(monitor).is_empty());
        assert!(registry.contains(key));

        registry.remove(key).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn interrupted_wait_is_detached_and_waking() {
        let mut registry = WaitRegistry::default();
        let monitor = MonitorId::next();
        let thread = other_thread();
        let key = registry.insert(thread, WaitKind::Monitor, Some(monitor), Deadline::At(3), Waiter::new());

        assert!(registry.mark_interrupted(key).is_some());
        assert!(registry.mark_interrupted(key).is_none());
        assert!(registry.mark_resumed(key).is_none());
        assert_eq!(registry.next_due(10), None);
        assert!(registry.monitor_waiters(monitor).is_empty());

        let (suspended, waking) = registry.thread_states();
        assert!(suspended.is_empty());
        assert!(waking.contains(&thread));
    }

    #[test]
    fn resumed_wait_can_still_be_interrupted() {
        let mut registry = WaitRegistry::default();
        let key = registry.insert(other_thread(), WaitKind::Sleep, None, Deadline::At(1), Waiter::new());
        let waiter = registry.mark_resumed(key).unwrap();
        waiter.signal();
        registry.mark_interrupted(key).unwrap().interrupt();
        assert_eq!(waiter.block(), Wakeup::Interrupted);
        assert!(registry.get(key).unwrap().interrupted);
    }

    #[test]
    fn park_lookup_ignores_other_wait_kinds() {
        let mut registry = WaitRegistry::default();
        let sleeper = other_thread();
        let parker = other_thread();
        registry.insert(sleeper, WaitKind::Sleep, None, Deadline::At(5), Waiter::new());
        let parked = registry.insert(parker, WaitKind::Park, None, Deadline::Never, Waiter::new());

        assert_eq!(registry.park_of(sleeper), None);
        assert_eq!(registry.park_of(parker), Some(parked));
    }

    #[test]
    fn waiter_reports_interrupt_over_signal() {
        let waiter = Waiter::new();
        waiter.signal();
        waiter.interrupt();
        assert_eq!(waiter.block(), Wakeup::Interrupted);
    }
}
