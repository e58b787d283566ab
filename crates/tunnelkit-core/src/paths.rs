//! Data directory layout

use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "TUNNELKIT_HOME";

/// Locations of everything tunnelkit keeps on disk
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Use an explicit root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the default root
    ///
    /// `$TUNNELKIT_HOME` wins, then the platform data directory, then
    /// `~/.tunnelkit`.
    ///
    /// # Errors
    /// Returns an error if no home or data directory can be determined
    pub fn discover() -> Result<Self, StoreError> {
        if let Some(root) = std::env::var_os(HOME_ENV) {
            return Ok(Self::new(root));
        }
        if let Some(data) = dirs::data_dir() {
            return Ok(Self::new(data.join("tunnelkit")));
        }
        let home = dirs::home_dir().ok_or_else(|| StoreError::Io {
            path: PathBuf::new(),
            message: "no home directory".into(),
        })?;
        Ok(Self::new(home.join(".tunnelkit")))
    }

    /// Create the root and the configs directory
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created
    pub fn ensure(&self) -> Result<(), StoreError> {
        for dir in [self.root.clone(), self.configs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::from_io(&dir, &e))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.root.join("profiles.db")
    }

    #[must_use]
    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    #[must_use]
    pub fn vault_dir(&self) -> PathBuf {
        self.root.join("vault")
    }

    #[must_use]
    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.toml")
    }

    /// Default command channel endpoint
    #[must_use]
    pub fn command_socket(&self) -> PathBuf {
        self.root.join("command.sock")
    }
}
