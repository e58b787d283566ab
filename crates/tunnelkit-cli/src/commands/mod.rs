//! CLI command handlers
//!
//! Profile management works directly on the data directory. Everything else
//! talks to, or is, the daemon.

pub mod admin;
pub mod daemon;
pub mod observe;
pub mod profile;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tunnelkit_core::storage::{Database, SharedDatabase};
use tunnelkit_core::{ContentStore, DataPaths, Settings};
use tunnelkit_remote::{HttpFetcher, ProfileManager};
use tunnelkit_service::PassthroughEngine;

/// Opened data directory
pub struct Workspace {
    pub paths: DataPaths,
    pub settings: Settings,
    pub db: SharedDatabase,
    pub content: ContentStore,
}

impl Workspace {
    /// Discover the data directory, create it if needed and open the store
    ///
    /// # Errors
    /// Returns an error if the directory, settings or database are unusable
    pub fn open() -> anyhow::Result<Self> {
        let paths = DataPaths::discover()?;
        paths
            .ensure()
            .with_context(|| format!("Failed to prepare {}", paths.root().display()))?;
        let settings = Settings::load(&paths.settings())?;
        let db = Database::open(&paths.database())
            .with_context(|| format!("Failed to open {}", paths.database().display()))?;
        let content = ContentStore::from_paths(&paths);

        Ok(Self {
            paths,
            settings,
            db: SharedDatabase::new(db),
            content,
        })
    }

    /// Profile manager using the HTTP fetcher and the built-in engine's checker
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn manager(&self) -> anyhow::Result<ProfileManager> {
        Ok(ProfileManager::new(
            self.db.clone(),
            self.content.clone(),
            Arc::new(HttpFetcher::new()?),
            Arc::new(PassthroughEngine),
        ))
    }
}

/// Command channel endpoint from the settings, without opening the store
///
/// # Errors
/// Returns an error if the data directory or settings cannot be resolved
pub fn socket_path() -> anyhow::Result<PathBuf> {
    let paths = DataPaths::discover()?;
    let settings = Settings::load(&paths.settings())?;
    Ok(settings.socket_path(&paths))
}
