//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while assembling or running a Junction host.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The queue worker needs a tokio runtime and none is running.
    #[error("Queue worker requires a running tokio runtime")]
    NoTokioRuntime,

    /// The global tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
