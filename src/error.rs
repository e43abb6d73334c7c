//! Error types for the request governor.
//!
//! Task failures are never wrapped in these; `execute` returns them as-is.

use thiserror::Error;

/// Errors raised by the governor's own setup: configuration and options.
#[derive(Error, Debug)]
pub enum GovernorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Retry options that can never make progress
    #[error("Invalid retry options: {0}")]
    InvalidOptions(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GovernorError {
    fn from(err: config::ConfigError) -> Self {
        GovernorError::Config(err.to_string())
    }
}

/// Result type alias for governor operations.
pub type Result<T> = std::result::Result<T, GovernorError>;
