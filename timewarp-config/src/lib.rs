//! # Timewarp Configuration System
//!
//! Layered configuration for the virtual-clock scheduler and its logging.
//!
//! ## Hierarchy
//! 1. Default values
//! 2. `config/timewarp.yaml`
//! 3. `config/<TIMEWARP_ENV>.yaml`
//! 4. `TIMEWARP_*` environment variables (`__` separates nesting levels)

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod scheduler;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use scheduler::SchedulerConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/timewarp.yaml";

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct TimewarpConfig {
    /// Virtual-clock scheduler and freeze detector parameters.
    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    /// Logging parameters.
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl TimewarpConfig {
    /// Load configuration from default files and environment.
    ///
    /// Missing files are skipped; the result is validated before it is returned.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(TimewarpConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        if let Ok(env) = std::env::var("TIMEWARP_ENV") {
            let env_file = format!("config/{}.yaml", env);
            if Path::new(&env_file).exists() {
                figment = figment.merge(Yaml::file(env_file));
            }
        }

        Self::extract(figment.merge(Env::prefixed("TIMEWARP_").ignore(&["env"]).split("__")))
    }

    /// Load configuration from a specific path, still honouring `TIMEWARP_*` overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }

        Self::extract(
            Figment::from(Serialized::defaults(TimewarpConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("TIMEWARP_").ignore(&["env"]).split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
