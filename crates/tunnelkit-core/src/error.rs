//! Error types for store and content operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing profiles and their content
#[derive(Debug, Error)]
pub enum StoreError {
    /// No profile with this id
    #[error("Profile not found: {0}")]
    NotFound(i64),

    /// Explicit id already taken
    #[error("Profile id {0} already exists")]
    Conflict(i64),

    /// Record violates a profile invariant
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Filesystem or vault access was refused
    #[error("Access denied to {path}: {message}")]
    Capability { path: PathBuf, message: String },

    /// File I/O error
    #[error("I/O error for {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Underlying database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be decoded
    #[error("Corrupt profile record: {0}")]
    Corrupt(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Get the error code for CLI responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidProfile(_) => "INVALID_PROFILE",
            Self::Capability { .. } => "CAPABILITY_DENIED",
            Self::Io { .. } => "IO_ERROR",
            Self::Sqlite(_) => "DATABASE_ERROR",
            Self::Corrupt(_) => "CORRUPT_RECORD",
            Self::Migration(_) => "MIGRATION_ERROR",
        }
    }

    /// Classify an I/O error on `path`, separating permission failures
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Capability {
                path,
                message: err.to_string(),
            }
        } else {
            Self::Io {
                path,
                message: err.to_string(),
            }
        }
    }
}
