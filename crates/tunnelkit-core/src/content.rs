//! Profile content storage
//!
//! Reads and writes the configuration document a profile points at.
//! `Local` and `Remote` documents live in the configs directory; an
//! `ExternalVault` path is resolved below the vault root. Every access runs
//! inside a [`ScopedAccess`] guard that is released on all exit paths.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::paths::DataPaths;
use crate::profile::{Profile, ProfileKind};

/// Document written for a profile that has no content yet
pub const EMPTY_DOCUMENT: &str = "{}";

/// Reads and writes profile documents
#[derive(Debug, Clone)]
pub struct ContentStore {
    configs_dir: PathBuf,
    vault_dir: PathBuf,
    active_scopes: Arc<AtomicUsize>,
}

impl ContentStore {
    /// Create a content store over the given directories
    #[must_use]
    pub fn new(configs_dir: impl Into<PathBuf>, vault_dir: impl Into<PathBuf>) -> Self {
        Self {
            configs_dir: configs_dir.into(),
            vault_dir: vault_dir.into(),
            active_scopes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Content store rooted in the data directory layout
    #[must_use]
    pub fn from_paths(paths: &DataPaths) -> Self {
        Self::new(paths.configs_dir(), paths.vault_dir())
    }

    /// Number of access scopes currently held
    #[must_use]
    pub fn active_scopes(&self) -> usize {
        self.active_scopes.load(Ordering::SeqCst)
    }

    /// Path of the cached/local document for a profile id
    #[must_use]
    pub fn config_path(&self, profile_id: i64) -> PathBuf {
        self.configs_dir.join(format!("config_{profile_id}.json"))
    }

    /// Resolve where a profile's document lives
    ///
    /// # Errors
    /// Returns `Capability` if a vault path escapes the vault root
    pub fn resolve(&self, profile: &Profile) -> Result<PathBuf, StoreError> {
        match profile.kind {
            ProfileKind::Local | ProfileKind::Remote => Ok(PathBuf::from(&profile.path)),
            ProfileKind::ExternalVault => vault_join(&self.vault_dir, &profile.path),
        }
    }

    /// Read a profile's document
    ///
    /// # Errors
    /// Returns `Capability` if access is refused, `Io` if the read fails
    pub fn read_content(&self, profile: &Profile) -> Result<String, StoreError> {
        let path = self.resolve(profile)?;
        let _scope = self.acquire(profile.kind, &path)?;
        fs::read_to_string(&path).map_err(|e| StoreError::from_io(&path, &e))
    }

    /// Replace a profile's document
    ///
    /// The write is atomic: readers see either the old or the new document.
    ///
    /// # Errors
    /// Returns `Capability` if access is refused, `Io` if the write fails
    pub fn save_content(&self, profile: &Profile, content: &str) -> Result<(), StoreError> {
        let path = self.resolve(profile)?;
        let _scope = self.acquire(profile.kind, &path)?;
        write_atomic(&path, content)
    }

    /// Create the document for a new local profile
    ///
    /// Copies `import` if given, otherwise writes [`EMPTY_DOCUMENT`].
    /// Returns the path to store in the profile.
    ///
    /// # Errors
    /// Returns an error if the import cannot be read or the file written
    pub fn create_local(
        &self,
        profile_id: i64,
        import: Option<&Path>,
    ) -> Result<String, StoreError> {
        let content = match import {
            Some(source) => {
                let _scope = self.acquire(ProfileKind::Local, source)?;
                fs::read_to_string(source).map_err(|e| StoreError::from_io(source, &e))?
            }
            None => EMPTY_DOCUMENT.to_string(),
        };
        self.create_cached(profile_id, &content)
    }

    /// Write the cached copy for a new remote profile
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn create_cached(&self, profile_id: i64, content: &str) -> Result<String, StoreError> {
        let path = self.config_path(profile_id);
        write_atomic(&path, content)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Ensure a vault entry exists, writing [`EMPTY_DOCUMENT`] if it is new
    ///
    /// # Errors
    /// Returns `Capability` for paths outside the vault or refused access
    pub fn create_vault_entry(&self, relative_path: &str) -> Result<String, StoreError> {
        let path = vault_join(&self.vault_dir, relative_path)?;
        let _scope = self.acquire(ProfileKind::ExternalVault, &path)?;
        if !path.exists() {
            write_atomic(&path, EMPTY_DOCUMENT)?;
        }
        Ok(relative_path.to_string())
    }

    /// Remove a profile's cached copy; vault entries are left alone
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be removed
    pub fn remove_cached(&self, profile: &Profile) -> Result<(), StoreError> {
        if profile.kind == ProfileKind::ExternalVault {
            return Ok(());
        }
        let path = self.resolve(profile)?;
        if !path.starts_with(&self.configs_dir) {
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from_io(&path, &e)),
        }
    }

    fn acquire(&self, kind: ProfileKind, path: &Path) -> Result<ScopedAccess, StoreError> {
        if kind == ProfileKind::ExternalVault {
            fs::create_dir_all(&self.vault_dir)
                .map_err(|e| StoreError::from_io(&self.vault_dir, &e))?;
            let meta =
                fs::metadata(&self.vault_dir).map_err(|e| StoreError::from_io(&self.vault_dir, &e))?;
            if !meta.is_dir() {
                return Err(StoreError::Capability {
                    path: self.vault_dir.clone(),
                    message: "vault root is not a directory".into(),
                });
            }
        }
        Ok(ScopedAccess::new(path, Arc::clone(&self.active_scopes)))
    }
}

/// Held while a profile document is being accessed
#[derive(Debug)]
pub struct ScopedAccess {
    path: PathBuf,
    counter: Arc<AtomicUsize>,
}

impl ScopedAccess {
    fn new(path: &Path, counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(path = %path.display(), "acquired content access");
        Self {
            path: path.to_path_buf(),
            counter,
        }
    }
}

impl Drop for ScopedAccess {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(path = %self.path.display(), "released content access");
    }
}

/// Join a vault-relative path, refusing anything that leaves the vault
fn vault_join(root: &Path, relative: &str) -> Result<PathBuf, StoreError> {
    let relative_path = Path::new(relative);
    let escapes = relative.is_empty()
        || relative_path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if escapes {
        return Err(StoreError::Capability {
            path: relative_path.to_path_buf(),
            message: "path must stay inside the vault".into(),
        });
    }
    Ok(root.join(relative_path))
}

fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::from_io(parent, &e))?;

    let mut file = NamedTempFile::new_in(parent).map_err(|e| StoreError::from_io(parent, &e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| StoreError::from_io(path, &e))?;
    file.persist(path)
        .map_err(|e| StoreError::from_io(path, &e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ContentStore {
        ContentStore::new(dir.path().join("configs"), dir.path().join("vault"))
    }

    #[test]
    fn test_local_round_trip() {
        let dir = TempDir::new().unwrap();
        let content = store(&dir);

        let path = content.create_local(4, None).unwrap();
        assert!(path.ends_with("config_4.json"));

        let profile = Profile::local("a", path).with_id(4);
        assert_eq!(content.read_content(&profile).unwrap(), EMPTY_DOCUMENT);

        content.save_content(&profile, r#"{"log":{}}"#).unwrap();
        assert_eq!(content.read_content(&profile).unwrap(), r#"{"log":{}}"#);
        assert_eq!(content.active_scopes(), 0);
    }

    #[test]
    fn test_import_copies_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("import.json");
        fs::write(&source, r#"{"dns":{}}"#).unwrap();

        let content = store(&dir);
        let path = content.create_local(1, Some(&source)).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), r#"{"dns":{}}"#);
    }

    #[test]
    fn test_scope_released_on_read_error() {
        let dir = TempDir::new().unwrap();
        let content = store(&dir);
        let profile = Profile::local("missing", dir.path().join("nope.json").to_string_lossy());

        assert!(matches!(
            content.read_content(&profile),
            Err(StoreError::Io { .. })
        ));
        assert_eq!(content.active_scopes(), 0);
    }

    #[test]
    fn test_vault_entry_created_once() {
        let dir = TempDir::new().unwrap();
        let content = store(&dir);

        content.create_vault_entry("team/config.json").unwrap();
        let profile = Profile::vault("v", "team/config.json");
        content.save_content(&profile, r#"{"a":1}"#).unwrap();

        // existing entry is not overwritten
        content.create_vault_entry("team/config.json").unwrap();
        assert_eq!(content.read_content(&profile).unwrap(), r#"{"a":1}"#);
        assert_eq!(content.active_scopes(), 0);
    }

    #[test]
    fn test_vault_traversal_refused() {
        let dir = TempDir::new().unwrap();
        let content = store(&dir);
        let profile = Profile::vault("v", "../outside.json");

        assert!(matches!(
            content.read_content(&profile),
            Err(StoreError::Capability { .. })
        ));
    }
}
