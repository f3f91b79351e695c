//! Tool errors. Every variant is rendered to text and handed back to the model.

use thiserror::Error;

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Calculation error: {0}")]
    Calculation(String),

    #[error("Tool not available: {0}")]
    NotAvailable(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory error: {0}")]
    Memory(#[from] jarvis_core::CoreError),
}
