use std::fmt;
use std::panic::Location;
use std::thread::ThreadId;

use thiserror::Error;

use crate::directory::ThreadState;

#[derive(Debug, Error)]
pub enum TimeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Virtual clock is already active, started at {origin}")]
    AlreadyActive { origin: ActivationOrigin },

    #[error("Virtual clock is not active")]
    NotActive,

    #[error("Wait was interrupted")]
    Interrupted,

    #[error("Threads did not settle before the deadline: {}", format_unsettled(.threads))]
    SettleTimeout { threads: Vec<UnsettledThread> },

    #[error("{0} is not supported by this time source")]
    Unsupported(&'static str),
}

/// Where and on which thread the active virtual clock was started.
#[derive(Debug, Clone)]
pub struct ActivationOrigin {
    pub location: &'static Location<'static>,
    pub thread: Option<String>,
}

impl ActivationOrigin {
    pub(crate) fn capture(location: &'static Location<'static>) -> Self {
        Self {
            location,
            thread: std::thread::current().name().map(str::to_owned),
        }
    }
}

impl fmt::Display for ActivationOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread {
            Some(name) => write!(f, "{} (thread '{}')", self.location, name),
            None => write!(f, "{} (unnamed thread)", self.location),
        }
    }
}

/// A thread that kept running past a `wait_until_frozen` deadline.
#[derive(Debug, Clone)]
pub struct UnsettledThread {
    pub id: ThreadId,
    pub name: Option<String>,
    pub state: ThreadState,
    pub stack: Option<String>,
}

impl fmt::Display for UnsettledThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("<unnamed>");
        write!(f, "{name} [{:?}, {:?}]", self.id, self.state)
    }
}

fn format_unsettled(threads: &[UnsettledThread]) -> String {
    threads
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
