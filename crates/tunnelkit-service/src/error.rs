//! Error types for the tunnel lifecycle

use thiserror::Error;
use tunnelkit_core::{SettingsError, StoreError};

/// Errors starting or controlling the tunnel
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No profile is selected, or the selection no longer exists
    #[error("No profile selected")]
    NoSelection,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The engine rejected the configuration; the message is the engine's
    #[error("{0}")]
    Config(String),

    /// The engine failed while starting or running
    #[error("Engine error: {0}")]
    Engine(String),

    /// The operation is not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ServiceError {
    /// Get the error code for CLI responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSelection => "NO_SELECTION",
            Self::Store(e) => e.code(),
            Self::Settings(_) => "SETTINGS_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Engine(_) => "ENGINE_ERROR",
            Self::InvalidState(_) => "INVALID_STATE",
        }
    }
}
