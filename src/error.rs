//! Error types for caprun
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while discovering, launching or tracking runs
#[derive(Debug, Error)]
pub enum CaprunError {
    /// Requested capability is not in the discovered set
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    /// Manifest missing, unreadable or failing validation
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Capability entrypoint could not be started
    #[error("Failed to spawn {entrypoint}: {source}")]
    Spawn {
        entrypoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Run ledger persistence error
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Run finished without producing a terminal record
    #[error("Run {0} ended without a terminal record")]
    RunLost(String),

    /// Console transport error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Host refused a request sent over the console
    #[error("Host rejected request: {0}")]
    Rejected(String),

    /// Malformed or unmatched request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaprunError {
    /// True for errors that mean the request was refused before any run existed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CaprunError::CapabilityNotFound(_) | CaprunError::Manifest(_) | CaprunError::InvalidRequest(_)
        )
    }
}

/// Result type alias for caprun operations
pub type Result<T> = std::result::Result<T, CaprunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_not_found_error() {
        let err = CaprunError::CapabilityNotFound("demo.echo".to_string());
        assert_eq!(err.to_string(), "Capability not found: demo.echo");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_manifest_error() {
        let err = CaprunError::Manifest("capability manifest not found".to_string());
        assert_eq!(err.to_string(), "Manifest error: capability manifest not found");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = CaprunError::Spawn {
            entrypoint: "/nonexistent/path".to_string(),
            source,
        };
        assert!(err.to_string().contains("/nonexistent/path"));
        assert!(err.to_string().contains("No such file"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_rejected_error() {
        let err = CaprunError::Rejected("Capability not found: demo.echo".to_string());
        assert_eq!(err.to_string(), "Host rejected request: Capability not found: demo.echo");
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_ledger_error() {
        let err = CaprunError::Ledger("disk full".to_string());
        assert_eq!(err.to_string(), "Ledger error: disk full");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CaprunError = io_err.into();
        assert!(matches!(err, CaprunError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: CaprunError = json_err.into();
        assert!(matches!(err, CaprunError::Json(_)));
    }
}
