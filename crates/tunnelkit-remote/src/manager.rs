//! Profile creation and remote content updates
//!
//! Every flow that produces or replaces a profile's document lives here, so
//! the checker gate is applied in one place: remote content that fails the
//! check is never written.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tunnelkit_core::storage::SharedDatabase;
use tunnelkit_core::{ConfigChecker, ContentStore, Profile, ProfileKind, StoreError};

use crate::error::RemoteError;
use crate::fetch::ContentFetcher;

/// Metadata changes for [`ProfileManager::edit`]; `None` keeps the field
#[derive(Debug, Clone, Default)]
pub struct ProfileEdit {
    pub name: Option<String>,
    pub remote_url: Option<String>,
    pub auto_update: Option<bool>,
}

/// Creates, checks, updates and removes profiles together with their content
#[derive(Clone)]
pub struct ProfileManager {
    db: SharedDatabase,
    content: ContentStore,
    fetcher: Arc<dyn ContentFetcher>,
    checker: Arc<dyn ConfigChecker>,
}

impl ProfileManager {
    #[must_use]
    pub fn new(
        db: SharedDatabase,
        content: ContentStore,
        fetcher: Arc<dyn ContentFetcher>,
        checker: Arc<dyn ConfigChecker>,
    ) -> Self {
        Self {
            db,
            content,
            fetcher,
            checker,
        }
    }

    #[must_use]
    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    #[must_use]
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Create a local profile, importing `import` or starting from `{}`
    ///
    /// # Errors
    /// Returns an error if the import cannot be read or the profile stored
    pub fn create_local(&self, name: &str, import: Option<&Path>) -> Result<Profile, RemoteError> {
        let profile = self.db.with_store(|store| {
            let id = store.next_id()?;
            let path = self.content.create_local(id, import)?;
            let mut profile = Profile::local(name, path).with_id(id);
            self.insert_or_discard(store, &mut profile)?;
            Ok(profile)
        })?;
        Ok(profile)
    }

    /// Create a profile backed by a vault entry, creating the entry if missing
    ///
    /// # Errors
    /// Returns `Capability` for paths outside the vault
    pub fn create_vault(&self, name: &str, relative_path: &str) -> Result<Profile, RemoteError> {
        let path = self.content.create_vault_entry(relative_path)?;
        let mut profile = Profile::vault(name, path);
        self.db.with_store(|store| store.create(&mut profile))?;
        Ok(profile)
    }

    /// Fetch `url`, check it, and create a remote profile holding the copy
    ///
    /// # Errors
    /// Returns `Fetch` or `Validation` before anything is written
    pub async fn create_remote(
        &self,
        name: &str,
        url: &str,
        auto_update: bool,
    ) -> Result<Profile, RemoteError> {
        let content = self.fetch_checked(url).await?;

        let profile = self.db.with_store(|store| {
            let id = store.next_id()?;
            let path = self.content.create_cached(id, &content)?;
            let mut profile = Profile::remote(name, path, url).with_id(id);
            profile.auto_update = auto_update;
            profile.last_updated = Some(Utc::now());
            self.insert_or_discard(store, &mut profile)?;
            Ok(profile)
        })?;

        tracing::info!(profile_id = ?profile.id, url, "created remote profile");
        Ok(profile)
    }

    /// Refetch a remote profile and replace its content
    ///
    /// On a fetch or validation failure neither the document nor
    /// `last_updated` changes. Returns the profile as stored afterwards.
    ///
    /// # Errors
    /// Returns `NotRemote` for other kinds, `Fetch`, `Validation` or `Store`
    pub async fn update_remote_profile(&self, profile: &Profile) -> Result<Profile, RemoteError> {
        let id = profile.id.unwrap_or_default();
        let url = match (&profile.kind, &profile.remote_url) {
            (ProfileKind::Remote, Some(url)) => url.clone(),
            _ => return Err(RemoteError::NotRemote(id)),
        };

        let content = self.fetch_checked(&url).await?;
        self.content.save_content(profile, &content)?;

        // the row may have been renamed or moved while fetching
        let updated = self.db.with_store(|store| {
            let mut current = store.get(id)?;
            current.last_updated = Some(Utc::now());
            store.update(&current)?;
            Ok(current)
        })?;

        tracing::debug!(profile_id = id, "updated remote profile");
        Ok(updated)
    }

    /// Apply metadata changes to the stored profile
    ///
    /// Reads the current row so that concurrent changes to other fields
    /// survive. A URL or auto-update on a non-remote profile is rejected.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id, `InvalidProfile` on a rejected change
    pub fn edit(&self, id: i64, edit: &ProfileEdit) -> Result<Profile, RemoteError> {
        let profile = self.db.with_store(|store| {
            let mut profile = store.get(id)?;
            if let Some(name) = &edit.name {
                profile.name.clone_from(name);
            }
            if let Some(url) = &edit.remote_url {
                profile.remote_url = Some(url.clone());
            }
            if let Some(auto_update) = edit.auto_update {
                profile.auto_update = auto_update;
            }
            store.update(&profile)?;
            Ok(profile)
        })?;
        tracing::debug!(profile_id = id, "edited profile");
        Ok(profile)
    }

    /// Replace a profile's document after it passes the checker
    ///
    /// # Errors
    /// Returns `Validation` before anything is written, or the store error
    pub fn set_content(&self, id: i64, content: &str) -> Result<Profile, RemoteError> {
        let profile = self.db.with_store(|store| store.get(id))?;
        self.checker
            .check_config(content)
            .map_err(RemoteError::Validation)?;
        self.content.save_content(&profile, content)?;
        tracing::debug!(profile_id = id, "replaced profile content");
        Ok(profile)
    }

    /// Run the config checker over a profile's current document
    ///
    /// # Errors
    /// Returns `Validation` with the checker's message, or the read error
    pub fn check(&self, profile: &Profile) -> Result<(), RemoteError> {
        let content = self.content.read_content(profile)?;
        self.checker
            .check_config(&content)
            .map_err(RemoteError::Validation)
    }

    /// Delete profiles and their cached documents, then re-pack `order`
    ///
    /// Returns how many rows were removed.
    ///
    /// # Errors
    /// Returns the first failing deletion's error; earlier ones stay deleted
    pub fn delete(&self, ids: &[i64]) -> Result<usize, RemoteError> {
        let deleted = self.db.with_store(|store| {
            let mut deleted = 0;
            for id in ids {
                let Some(profile) = store.find(*id)? else {
                    continue;
                };
                if store.delete(*id)? {
                    deleted += 1;
                }
                if let Err(e) = self.content.remove_cached(&profile) {
                    tracing::warn!(profile_id = id, error = %e, "failed to remove profile content");
                }
            }
            let remaining: Vec<i64> = store.list()?.iter().filter_map(|p| p.id).collect();
            store.reorder(&remaining)?;
            Ok(deleted)
        })?;
        Ok(deleted)
    }

    /// Move a profile to `index` in the list, shifting the others
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id
    pub fn move_to(&self, id: i64, index: usize) -> Result<(), RemoteError> {
        self.db.with_store(|store| {
            let mut ids: Vec<i64> = store.list()?.iter().filter_map(|p| p.id).collect();
            let from = ids
                .iter()
                .position(|candidate| *candidate == id)
                .ok_or(StoreError::NotFound(id))?;
            let moved = ids.remove(from);
            ids.insert(index.min(ids.len()), moved);
            store.reorder(&ids)
        })?;
        Ok(())
    }

    async fn fetch_checked(&self, url: &str) -> Result<String, RemoteError> {
        let content = self.fetcher.fetch(url).await?;
        self.checker
            .check_config(&content)
            .map_err(RemoteError::Validation)?;
        Ok(content)
    }

    fn insert_or_discard(
        &self,
        store: &tunnelkit_core::storage::ProfileStore<'_>,
        profile: &mut Profile,
    ) -> Result<i64, StoreError> {
        match store.create(profile) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Err(cleanup) = self.content.remove_cached(profile) {
                    tracing::warn!(
                        profile_id = ?profile.id,
                        error = %cleanup,
                        "failed to discard profile content"
                    );
                }
                Err(e)
            }
        }
    }
}
