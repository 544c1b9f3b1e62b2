//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// Listen socket could not be bound
    #[error("Failed to listen on {addr}: {message}")]
    Bind { addr: String, message: String },

    /// Connecting to the host failed
    #[error("Failed to connect to host at {addr}: {message}")]
    Connect { addr: String, message: String },

    /// Session ended with an error
    #[error("Session failed: {0}")]
    Session(#[from] session::SessionError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn bind(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            addr: addr.into(),
            message: message.into(),
        }
    }

    pub fn connect(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            addr: addr.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
