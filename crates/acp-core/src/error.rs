//! Unified error types for acp-core

use thiserror::Error;

/// Errors raised while parsing or validating control plane inputs
#[derive(Error, Debug)]
pub enum AcpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using AcpError
pub type Result<T> = std::result::Result<T, AcpError>;
