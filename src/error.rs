//! Custom error types for zfs-s3-backup
//!
//! This module defines the error hierarchy for the backup engine using
//! thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid mode/filter/retention combination or malformed settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// The filter left nothing to back up
    #[error("No datasets selected: {0}")]
    EmptySelection(String),

    /// The storage layer refused to create the run snapshot
    #[error("Snapshot create error: {0}")]
    SnapshotCreate(String),

    /// The storage layer failed to destroy the run snapshot
    #[error("Snapshot destroy error: {0}")]
    SnapshotDestroy(String),

    /// A stage of the transfer pipeline failed for one unit
    #[error("Transfer of {unit} failed: {message}")]
    Transfer { unit: String, message: String },

    /// Listing the remote namespace failed
    #[error("Retention error: {0}")]
    Retention(String),

    /// Storage collaborator errors (zfs list, send)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote object store errors
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Compression stage errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// The run was cancelled by a signal
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Another run holds the lock
    #[error("Lock error: {0}")]
    Lock(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl BackupError {
    /// Create a "not found" error for snapshots
    pub fn snapshot_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Snapshot",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for remote objects
    pub fn object_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Object",
            identifier: identifier.into(),
        }
    }

    /// Create a transfer error for the given unit
    pub fn transfer(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
        assert!(err.is_config());
    }

    #[test]
    fn test_not_found_error() {
        let err = BackupError::snapshot_not_found("tank@20250101_000000");
        assert_eq!(err.to_string(), "Snapshot not found: tank@20250101_000000");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_transfer_error() {
        let err = BackupError::transfer("tank/home", "upload stage: connection reset");
        assert_eq!(
            err.to_string(),
            "Transfer of tank/home failed: upload stage: connection reset"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let backup_err: BackupError = io_err.into();
        assert!(matches!(backup_err, BackupError::Io(_)));
    }
}
