use crate::config::ConfigError;
use crate::watcher::WatchError;
use thiserror::Error;

/// Top-level error type for the confsync library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("engine requires a registry")]
    MissingRegistry,

    #[error("engine is already running")]
    AlreadyRunning,
}
