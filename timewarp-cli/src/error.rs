use thiserror::Error;
use timewarp_config::ConfigError;
use timewarp_core::TimeError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker {0} panicked")]
    WorkerPanicked(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}
