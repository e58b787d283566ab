//! Process-wide settings
//!
//! Stored as TOML next to the profile database. Every field has a default so
//! a missing or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StoreError;
use crate::paths::DataPaths;
use crate::profile::Profile;
use crate::storage::ProfileStore;

/// One year
const MAX_UPDATE_INTERVAL_MINUTES: u64 = 60 * 24 * 365;

/// Errors loading or saving settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse settings {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to write settings {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Settings shared by the daemon and observer processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Profile started by the tunnel; 0 means none
    pub selected_profile_id: i64,
    /// Route all traffic through the tunnel
    pub include_all_networks: bool,
    /// Leave local networks outside the tunnel
    pub exclude_local_networks: bool,
    /// Enforce tunnel routes over interface routes
    pub enforce_routes: bool,
    /// Run the engine without a memory ceiling
    pub disable_memory_limit: bool,
    /// Cadence of status snapshots pushed to observers
    pub status_interval_ms: u64,
    /// Minimum spacing between refreshes of remote profiles
    pub update_interval_minutes: u64,
    /// Command channel endpoint; defaults inside the data directory
    pub socket_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_profile_id: 0,
            include_all_networks: false,
            exclude_local_networks: true,
            enforce_routes: false,
            disable_memory_limit: false,
            status_interval_ms: 2000,
            update_interval_minutes: 15,
            socket_path: None,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        toml::from_str(&raw).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Write settings atomically
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |message: String| SettingsError::Write {
            path: path.to_path_buf(),
            message,
        };
        let raw = toml::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        let mut file =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| write_err(e.to_string()))?;
        std::io::Write::write_all(&mut file, raw.as_bytes()).map_err(|e| write_err(e.to_string()))?;
        file.persist(path).map_err(|e| write_err(e.error.to_string()))?;
        Ok(())
    }

    /// Status push cadence
    #[must_use]
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }

    /// Refresh interval for auto-updating profiles
    #[must_use]
    pub fn update_interval(&self) -> chrono::Duration {
        let minutes = self.update_interval_minutes.clamp(1, MAX_UPDATE_INTERVAL_MINUTES);
        chrono::Duration::minutes(i64::try_from(minutes).unwrap_or(1))
    }

    /// Command channel endpoint for this data directory
    #[must_use]
    pub fn socket_path(&self, paths: &DataPaths) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| paths.command_socket())
    }

    /// Resolve the selected profile
    ///
    /// The setting is a weak reference: an unset id or one whose profile was
    /// deleted both mean "no selection".
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried
    pub fn selected_profile(&self, store: &ProfileStore<'_>) -> Result<Option<Profile>, StoreError> {
        if self.selected_profile_id == 0 {
            return Ok(None);
        }
        store.find(self.selected_profile_id)
    }
}
