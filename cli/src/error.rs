//! CLI error types

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Daemon error: {0}")]
    DaemonError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] hyper::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// CLI-specific result type
pub type Result<T> = std::result::Result<T, CliError>;
