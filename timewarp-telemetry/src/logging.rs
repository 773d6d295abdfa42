//! ## timewarp-telemetry::logging
//! **Structured logging with `tracing-subscriber`**
//!
//! `RUST_LOG` wins over the configured filter so a single test run can be
//! turned up without touching config files.

use timewarp_config::TelemetryConfig;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. Panics if one is already set.
    pub fn init(config: &TelemetryConfig) {
        if let Err(e) = Self::try_init(config) {
            panic!("failed to install tracing subscriber: {e}");
        }
    }

    /// Installs the global subscriber, leaving an existing one in place.
    pub fn try_init(
        config: &TelemetryConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = Self::filter(config);
        let builder = fmt()
            .with_env_filter(filter)
            .with_thread_names(config.thread_names);

        if config.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        }
    }

    fn filter(config: &TelemetryConfig) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    }
}
