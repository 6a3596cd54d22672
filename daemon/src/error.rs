//! Daemon error types

use thiserror::Error;

/// Errors raised while booting or serving the daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("server error: {0}")]
    Server(String),

    #[error("engine error: {0}")]
    Core(#[from] gemstone_core::CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// Daemon-specific result type
pub type Result<T> = std::result::Result<T, DaemonError>;
