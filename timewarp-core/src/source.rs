//! ## timewarp-core::source
//! **Pluggable time providers**
//!
//! Code that reads time or sleeps through a [`TimeSource`] can be handed the
//! real clock, a scheduler-backed one, or one that refuses every call.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TimeError;
use crate::scheduler::{wall_clock_millis, Activation, Scheduler};

pub trait TimeSource: Send + Sync {
    /// Milliseconds since the epoch of this source.
    fn time_millis(&self) -> Result<u64, TimeError>;

    /// Monotonic nanoseconds from an arbitrary origin.
    fn nano_time(&self) -> Result<u64, TimeError>;

    fn sleep(&self, duration: Duration) -> Result<(), TimeError>;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn time_millis(&self) -> Result<u64, TimeError> {
        Ok(wall_clock_millis())
    }

    fn nano_time(&self) -> Result<u64, TimeError> {
        Ok(self.origin.elapsed().as_nanos() as u64)
    }

    fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        thread::sleep(duration);
        Ok(())
    }
}

/// A scheduler seen from call sites with a fixed activation.
#[derive(Clone)]
pub struct ScopedTime {
    scheduler: Arc<Scheduler>,
    activation: Activation,
}

impl ScopedTime {
    pub fn new(scheduler: Arc<Scheduler>, activation: Activation) -> Self {
        Self {
            scheduler,
            activation,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl TimeSource for ScopedTime {
    fn time_millis(&self) -> Result<u64, TimeError> {
        Ok(self.scheduler.time_millis(self.activation))
    }

    fn nano_time(&self) -> Result<u64, TimeError> {
        Ok(self.scheduler.nano_time(self.activation))
    }

    fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        let millis = i64::try_from(duration.as_millis()).map_err(|_| {
            TimeError::InvalidArgument(format!("sleep duration too long: {duration:?}"))
        })?;
        let nanos = (duration.subsec_nanos() % 1_000_000) as i32;
        self.scheduler.sleep(self.activation, millis, nanos)
    }
}

/// Rejects every call, for code that must not depend on time.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedTimeSource;

impl TimeSource for UnsupportedTimeSource {
    fn time_millis(&self) -> Result<u64, TimeError> {
        Err(TimeError::Unsupported("time_millis"))
    }

    fn nano_time(&self) -> Result<u64, TimeError> {
        Err(TimeError::Unsupported("nano_time"))
    }

    fn sleep(&self, _duration: Duration) -> Result<(), TimeError> {
        Err(TimeError::Unsupported("sleep"))
    }
}
