//! Error types for remote profile operations

use thiserror::Error;
use tunnelkit_core::StoreError;

/// Errors fetching, validating or persisting remote content
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or HTTP failure
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// Content rejected by the config checker; the message is the checker's own
    #[error("{0}")]
    Validation(String),

    /// Operation only applies to remote profiles
    #[error("Profile {0} is not a remote profile")]
    NotRemote(i64),

    /// Store or content failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RemoteError {
    /// Get the error code for CLI responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "FETCH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotRemote(_) => "NOT_REMOTE",
            Self::Store(e) => e.code(),
        }
    }
}
