//! # timewarp-core
//!
//! Deterministic control of time for multi-threaded tests.
//!
//! Wall-clock reads, sleeps, monitor waits and thread parking go through a
//! [`Scheduler`] whose clock only moves when the test moves it. A settle
//! primitive blocks until every interesting thread is waiting in a way the
//! virtual clock accounts for.
//!
//! ### Key Submodules:
//! - `clock`: `VirtualClock` on an atomic counter, deadlines, duration rounding
//! - `registry`: ordered wait entries and their private wake-up handles
//! - `scheduler`: the facade, resolver and park/interrupt bookkeeping
//! - `freeze`: settle detection over a `ThreadDirectory`
//! - `directory`: the `ThreadDirectory` port and the `TrackedThreads` adapter
//! - `source`: `TimeSource` providers

pub mod clock;
pub mod directory;
pub mod error;
pub mod freeze;
pub mod monitor;
pub mod park;
pub mod registry;
pub mod scheduler;
pub mod source;

pub mod prelude {
    pub use crate::clock::*;
    pub use crate::directory::*;
    pub use crate::error::*;
    pub use crate::monitor::*;
    pub use crate::scheduler::*;
    pub use crate::source::*;
}

pub use directory::{ThreadDirectory, TrackedThreads};
pub use error::TimeError;
pub use monitor::Monitor;
pub use scheduler::{Activation, Scheduler};
