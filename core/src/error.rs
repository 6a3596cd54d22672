//! Core error types and utilities

use thiserror::Error;

/// Engine error taxonomy
///
/// Variant messages are user-visible: they travel through the control-plane
/// response envelope unchanged.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("process {0} not found")]
    NotFound(String),

    #[error("process with name {0} already exists")]
    NameConflict(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("OS resource error: {0}")]
    OsResource(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_api_wording() {
        let err = CoreError::NameConflict("web".to_string());
        assert_eq!(err.to_string(), "process with name web already exists");

        let err = CoreError::NotFound("abc123".to_string());
        assert_eq!(err.to_string(), "process abc123 not found");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
