//! Virtual-clock scheduler parameters.
//!
//! Controls how the freeze detector polls and what the clock starts at:
//! - Poll cadence and default deadline of `wait_until_frozen`
//! - Optional fixed start instant (otherwise wall-clock millis)

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Scheduler configuration parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Interval between two thread-directory scans, in real milliseconds.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1, max = 1000))]
    pub freeze_poll_interval_ms: u64,

    /// Deadline used by `wait_until_frozen_default`, in real milliseconds.
    #[serde(default = "default_settle_timeout")]
    #[validate(range(min = 1, max = 600000))]
    pub settle_timeout_ms: u64,

    /// Virtual instant used by `start(None)`. Wall-clock millis when unset.
    #[serde(default)]
    pub start_instant: Option<u64>,

    /// Log a warning for threads found in a timed wait the scheduler does not own.
    #[serde(default = "default_true")]
    pub warn_on_foreign_timed_waits: bool,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_settle_timeout() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            freeze_poll_interval_ms: default_poll_interval(),
            settle_timeout_ms: default_settle_timeout(),
            start_instant: None,
            warn_on_foreign_timed_waits: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = SchedulerConfig {
            freeze_poll_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.freeze_poll_interval_ms, 10);
        assert_eq!(config.settle_timeout_ms, 1000);
        assert!(config.start_instant.is_none());
        assert!(config.warn_on_foreign_timed_waits);
    }
}
