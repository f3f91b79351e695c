//! Error types for the Jarvis core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by configuration, memory and language-model backends
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed backend response: {0}")]
    Protocol(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
