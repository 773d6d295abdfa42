//! ## timewarp-core::freeze
//! **Settle detection**
//!
//! Polls the thread directory until every thread of interest is terminated
//! or suspended in a wait the virtual clock accounts for. Polling uses real
//! time: the virtual clock is frozen while a test waits for threads.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{error, trace, warn};

use crate::directory::{ThreadDirectory, ThreadRecord, ThreadState};
use crate::error::{TimeError, UnsettledThread};

/// What the scheduler knows about threads, copied under its core lock.
#[derive(Debug, Default, Clone)]
pub struct RegistryView {
    /// Threads suspended on an unresumed wait.
    pub suspended: HashSet<ThreadId>,
    /// Threads resumed but not yet back from their wait.
    pub waking: HashSet<ThreadId>,
    /// Threads between "about to wait" and registration.
    pub registering: HashSet<ThreadId>,
    /// Threads alive when the clock was started.
    pub excluded: HashSet<ThreadId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ignored,
    Settled,
    /// Settled, but in a timed wait the scheduler does not own.
    ForeignTimedWait,
    Unsettled,
}

pub fn classify(record: &ThreadRecord, view: &RegistryView) -> Verdict {
    if view.excluded.contains(&record.id) {
        return Verdict::Ignored;
    }
    if view.suspended.contains(&record.id) {
        return Verdict::Settled;
    }
    if view.waking.contains(&record.id) {
        return Verdict::Unsettled;
    }
    if view.registering.contains(&record.id) {
        return Verdict::Settled;
    }
    match record.state {
        ThreadState::Terminated | ThreadState::Waiting | ThreadState::New => Verdict::Settled,
        ThreadState::TimedWaiting => Verdict::ForeignTimedWait,
        ThreadState::Blocked | ThreadState::Runnable => Verdict::Unsettled,
    }
}

pub struct FreezeDetector {
    directory: Arc<dyn ThreadDirectory>,
    poll_interval: Duration,
    warn_on_foreign_timed_waits: bool,
}

/// State of one `wait_until_frozen` call.
struct SettlingSession {
    deadline: Instant,
    unsettled: Vec<ThreadRecord>,
    warned: HashSet<ThreadId>,
}

impl FreezeDetector {
    pub fn new(
        directory: Arc<dyn ThreadDirectory>,
        poll_interval: Duration,
        warn_on_foreign_timed_waits: bool,
    ) -> Self {
        Self {
            directory,
            poll_interval,
            warn_on_foreign_timed_waits,
        }
    }

    pub fn directory(&self) -> &Arc<dyn ThreadDirectory> {
        &self.directory
    }

    /// Polls until no thread is unsettled, or fails once `timeout` elapsed.
    /// `view` is called once per poll and must not hold locks when it returns.
    pub fn wait_until_frozen(
        &self,
        timeout: Duration,
        view: impl Fn() -> RegistryView,
    ) -> Result<(), TimeError> {
        let mut session = SettlingSession {
            deadline: Instant::now() + timeout,
            unsettled: Vec::new(),
            warned: HashSet::new(),
        };

        loop {
            let polled_at = Instant::now();
            self.scan(&view(), &mut session);
            if session.unsettled.is_empty() {
                return Ok(());
            }
            if polled_at >= session.deadline {
                return Err(self.fail(session));
            }
            trace!(unsettled = session.unsettled.len(), "threads not frozen yet");
            thread::sleep(self.poll_interval);
        }
    }

    fn scan(&self, view: &RegistryView, session: &mut SettlingSession) {
        session.unsettled.clear();
        for record in self.directory.enumerate() {
            match classify(&record, view) {
                Verdict::Unsettled => session.unsettled.push(record),
                Verdict::ForeignTimedWait => {
                    if self.warn_on_foreign_timed_waits && session.warned.insert(record.id) {
                        warn!(
                            thread = ?record.id,
                            name = record.name.as_deref().unwrap_or("<unnamed>"),
                            "thread is in a timed wait the virtual clock does not control"
                        );
                    }
                }
                Verdict::Settled | Verdict::Ignored => {}
            }
        }
    }

    fn fail(&self, session: SettlingSession) -> TimeError {
        error!("waiting until threads are frozen failed by timeout, stacks of non-frozen threads follow");
        let threads: Vec<UnsettledThread> = session
            .unsettled
            .into_iter()
            .map(|record| {
                let stack = self.directory.stack_trace(record.id);
                error!(
                    thread = ?record.id,
                    name = record.name.as_deref().unwrap_or("<unnamed>"),
                    state = ?record.state,
                    stack = stack.as_deref().unwrap_or("<unavailable>"),
                    "thread did not freeze"
                );
                UnsettledThread {
                    id: record.id,
                    name: record.name,
                    state: record.state,
                    stack,
                }
            })
            .collect();
        TimeError::SettleTimeout { threads }
    }
}
