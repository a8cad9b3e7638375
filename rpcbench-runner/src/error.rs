//! Runner error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Runner errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write report '{}': {1}", .0.display())]
    Report(PathBuf, #[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
