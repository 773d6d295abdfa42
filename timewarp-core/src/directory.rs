//! ## timewarp-core::directory
//! **Thread directory port and an in-process implementation**
//!
//! The freeze detector asks a [`ThreadDirectory`] which threads exist and
//! what they are doing. [`TrackedThreads`] answers for threads spawned
//! through it; code that blocks on primitives the scheduler does not see
//! can report that with [`TrackedThreads::mark`].

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::io;
use std::panic::Location;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tracing::debug;

/// Lifecycle category of a thread as reported by a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    New,
    Runnable,
    /// Blocked acquiring a lock.
    Blocked,
    /// Waiting with no timeout.
    Waiting,
    /// Waiting with a timeout on a primitive outside the scheduler.
    TimedWaiting,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub name: Option<String>,
    pub state: ThreadState,
}

/// Enumerates live threads and describes them.
pub trait ThreadDirectory: Send + Sync {
    fn enumerate(&self) -> Vec<ThreadRecord>;

    /// Diagnostic stack for `id`, if the directory can produce one.
    fn stack_trace(&self, id: ThreadId) -> Option<String>;
}

struct Tracked {
    name: Option<String>,
    state: ThreadState,
    origin: &'static Location<'static>,
    backtrace: Option<String>,
}

/// Directory of threads spawned or adopted through it.
#[derive(Default)]
pub struct TrackedThreads {
    threads: Mutex<HashMap<ThreadId, Tracked>>,
}

impl TrackedThreads {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawns a named thread that is `Runnable` before its body runs and
    /// `Terminated` once the body returns or unwinds.
    #[track_caller]
    pub fn spawn<F, T>(self: &Arc<Self>, name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let origin = Location::caller();
        let directory = Arc::clone(self);

        // Held across spawn so the body cannot report termination before it is listed.
        let mut threads = self.threads.lock();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _exit = Membership {
                directory,
                id: thread::current().id(),
            };
            f()
        })?;
        let id = handle.thread().id();
        threads.insert(id, Tracked::new(Some(name), origin));
        debug!(thread = ?id, "tracked thread spawned");
        Ok(handle)
    }

    /// Lists the calling thread until the returned guard is dropped.
    #[track_caller]
    pub fn adopt_current(self: &Arc<Self>) -> Membership {
        let current = thread::current();
        self.threads.lock().insert(
            current.id(),
            Tracked::new(current.name().map(str::to_owned), Location::caller()),
        );
        Membership {
            directory: Arc::clone(self),
            id: current.id(),
        }
    }

    /// Reports the calling thread as `state` until the guard is dropped.
    pub fn mark(&self, state: ThreadState) -> StateMark<'_> {
        let id = thread::current().id();
        self.set_state(id, state);
        StateMark {
            directory: self,
            id,
        }
    }

    /// Drops terminated threads from the listing.
    pub fn prune(&self) {
        self.threads
            .lock()
            .retain(|_, tracked| tracked.state != ThreadState::Terminated);
    }

    pub fn state_of(&self, id: ThreadId) -> Option<ThreadState> {
        self.threads.lock().get(&id).map(|tracked| tracked.state)
    }

    fn set_state(&self, id: ThreadId, state: ThreadState) {
        if let Some(tracked) = self.threads.lock().get_mut(&id) {
            tracked.state = state;
        }
    }
}

impl Tracked {
    fn new(name: Option<String>, origin: &'static Location<'static>) -> Self {
        let backtrace = Backtrace::capture();
        Self {
            name,
            state: ThreadState::Runnable,
            origin,
            backtrace: (backtrace.status() == BacktraceStatus::Captured)
                .then(|| backtrace.to_string()),
        }
    }
}

impl ThreadDirectory for TrackedThreads {
    fn enumerate(&self) -> Vec<ThreadRecord> {
        self.threads
            .lock()
            .iter()
            .map(|(id, tracked)| ThreadRecord {
                id: *id,
                name: tracked.name.clone(),
                state: tracked.state,
            })
            .collect()
    }

    fn stack_trace(&self, id: ThreadId) -> Option<String> {
        let threads = self.threads.lock();
        let tracked = threads.get(&id)?;
        let mut trace = format!("registered at {}", tracked.origin);
        if let Some(backtrace) = &tracked.backtrace {
            trace.push('\n');
            trace.push_str(backtrace);
        }
        Some(trace)
    }
}

/// Marks its thread `Terminated` on drop.
pub struct Membership {
    directory: Arc<TrackedThreads>,
    id: ThreadId,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.directory.set_state(self.id, ThreadState::Terminated);
    }
}

/// Restores `Runnable` on drop.
pub struct StateMark<'a> {
    directory: &'a TrackedThreads,
    id: ThreadId,
}

impl Drop for StateMark<'_> {
    fn drop(&mut self) {
        self.directory.set_state(self.id, ThreadState::Runnable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_thread_is_listed_until_it_terminates() {
        let threads = TrackedThreads::new();
        let (tx, rx) = crossbeam::channel::bounded::<()>(0);
        let handle = threads
            .spawn("worker", move || {
                rx.recv().unwrap();
            })
            .unwrap();
        let id = handle.thread().id();

        assert_eq!(threads.state_of(id), Some(ThreadState::Runnable));
        tx.send(()).unwrap();
        handle.join().unwrap();
        assert_eq!(threads.state_of(id), Some(ThreadState::Terminated));

        let record = threads.enumerate().pop().unwrap();
        assert_eq!(record.name.as_deref(), Some("worker"));

        threads.prune();
        assert!(threads.enumerate().is_empty());
    }

    #[test]
    fn panicking_body_still_terminates() {
        let threads = TrackedThreads::new();
        let handle = threads.spawn("doomed", || panic!("boom")).unwrap();
        let id = handle.thread().id();
        assert!(handle.join().is_err());
        assert_eq!(threads.state_of(id), Some(ThreadState::Terminated));
    }

    #[test]
    fn mark_restores_runnable() {
        let threads = TrackedThreads::new();
        let _member = threads.adopt_current();
        let me = thread::current().id();
        {
            let _mark = threads.mark(ThreadState::Waiting);
            assert_eq!(threads.state_of(me), Some(ThreadState::Waiting));
        }
        assert_eq!(threads.state_of(me), Some(ThreadState::Runnable));
        assert!(threads.stack_trace(me).unwrap().starts_with("registered at"));
    }
}
