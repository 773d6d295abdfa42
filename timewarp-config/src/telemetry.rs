//! Logging configuration.
//!
//! Parameters for the `tracing-subscriber` setup done by `timewarp-telemetry`.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    #[validate(custom(function = validation::validate_filter))]
    pub log_filter: String,

    /// Emit JSON lines instead of the human readable format.
    #[serde(default)]
    pub json: bool,

    /// Include thread names in every event.
    #[serde(default = "default_true")]
    pub thread_names: bool,
}

fn default_filter() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_filter(),
            json: false,
            thread_names: default_true(),
        }
    }
}
