//! Where the controller finds the configuration to start

use std::path::PathBuf;

use tunnelkit_core::storage::SharedDatabase;
use tunnelkit_core::{ContentStore, Profile, Settings};

use crate::engine::TunnelOptions;
use crate::error::ServiceError;

/// Everything needed to start the selected profile
#[derive(Debug, Clone)]
pub struct SelectedConfig {
    pub profile: Profile,
    pub content: String,
    pub options: TunnelOptions,
}

/// Supplies the selected profile's configuration
pub trait ConfigSource: Send + Sync {
    /// # Errors
    /// Returns `NoSelection` when nothing is selected, or the read error
    fn selected_config(&self) -> Result<SelectedConfig, ServiceError>;
}

/// Reads the selection from the settings file and content from the store
///
/// Settings are re-read on every call so a selection made by another
/// process applies on the next start or reload.
#[derive(Clone)]
pub struct StoreConfigSource {
    db: SharedDatabase,
    content: ContentStore,
    settings_path: PathBuf,
}

impl StoreConfigSource {
    #[must_use]
    pub fn new(db: SharedDatabase, content: ContentStore, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            content,
            settings_path: settings_path.into(),
        }
    }
}

impl ConfigSource for StoreConfigSource {
    fn selected_config(&self) -> Result<SelectedConfig, ServiceError> {
        let settings = Settings::load(&self.settings_path)?;
        let profile = self
            .db
            .with_store(|store| settings.selected_profile(store))?
            .ok_or(ServiceError::NoSelection)?;
        let content = self.content.read_content(&profile)?;

        Ok(SelectedConfig {
            profile,
            content,
            options: TunnelOptions::from(&settings),
        })
    }
}
