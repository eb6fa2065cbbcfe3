//! Core error types

use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML config did not parse
    #[cfg(feature = "toml")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON config did not parse
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config parsed but violates a constraint
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Logging initialization errors
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log filter directive did not parse
    #[error("Invalid log filter '{directive}': {reason}")]
    Filter {
        /// Directive as configured
        directive: String,
        /// Parser message
        reason: String,
    },

    /// Log file could not be opened
    #[error("Cannot open log file: {0}")]
    Io(#[from] std::io::Error),

    /// A global subscriber was already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
