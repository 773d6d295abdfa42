//! # Timewarp Telemetry
//!
//! Logging setup and scheduler metrics.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
