//! Profile types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Where a profile's configuration document lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// File in the local configs directory
    #[default]
    Local,
    /// Entry below the external vault root; `path` is vault-relative
    ExternalVault,
    /// Cached copy of a document fetched from `remote_url`
    Remote,
}

impl ProfileKind {
    /// Integer stored in the `type` column
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            ProfileKind::Local => 0,
            ProfileKind::ExternalVault => 1,
            ProfileKind::Remote => 2,
        }
    }

    /// Decode the `type` column
    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ProfileKind::Local),
            1 => Some(ProfileKind::ExternalVault),
            2 => Some(ProfileKind::Remote),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::Local => write!(f, "local"),
            ProfileKind::ExternalVault => write!(f, "vault"),
            ProfileKind::Remote => write!(f, "remote"),
        }
    }
}

/// A named configuration document plus the metadata needed to refresh it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Row id, `None` until created
    pub id: Option<i64>,
    /// Display name
    pub name: String,
    /// Position in the display/selection order
    pub order: u32,
    /// Storage kind
    pub kind: ProfileKind,
    /// Content location (meaning depends on `kind`)
    pub path: String,
    /// Source URL, set iff `kind` is `Remote`
    pub remote_url: Option<String>,
    /// Include in periodic refresh
    pub auto_update: bool,
    /// Last successful refresh of the remote content
    pub last_updated: Option<DateTime<Utc>>,
}

impl Profile {
    /// A profile backed by a local file
    #[must_use]
    pub fn local(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_kind(name.into(), ProfileKind::Local, path.into())
    }

    /// A profile backed by an entry in the external vault
    #[must_use]
    pub fn vault(name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self::with_kind(name.into(), ProfileKind::ExternalVault, relative_path.into())
    }

    /// A profile whose content is fetched from `url` and cached at `path`
    #[must_use]
    pub fn remote(
        name: impl Into<String>,
        path: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let mut profile = Self::with_kind(name.into(), ProfileKind::Remote, path.into());
        profile.remote_url = Some(url.into());
        profile
    }

    fn with_kind(name: String, kind: ProfileKind, path: String) -> Self {
        Self {
            id: None,
            name,
            order: 0,
            kind,
            path,
            remote_url: None,
            auto_update: false,
            last_updated: None,
        }
    }

    /// Set an explicit id for creation
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Check the record-level invariants
    ///
    /// # Errors
    /// Returns `InvalidProfile` naming the violated rule
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidProfile("name cannot be empty".into()));
        }
        match (self.kind, &self.remote_url) {
            (ProfileKind::Remote, None) => Err(StoreError::InvalidProfile(
                "remote profile requires a remote URL".into(),
            )),
            (ProfileKind::Local | ProfileKind::ExternalVault, Some(_)) => {
                Err(StoreError::InvalidProfile(format!(
                    "{} profile cannot carry a remote URL",
                    self.kind
                )))
            }
            (kind, _) if kind != ProfileKind::Remote && self.auto_update => Err(
                StoreError::InvalidProfile(format!("{kind} profile cannot auto-update")),
            ),
            _ => Ok(()),
        }
    }

    /// Whether this profile takes part in scheduled refresh
    #[must_use]
    pub fn is_auto_updating(&self) -> bool {
        self.kind == ProfileKind::Remote && self.auto_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_column_round_trip() {
        for kind in [
            ProfileKind::Local,
            ProfileKind::ExternalVault,
            ProfileKind::Remote,
        ] {
            assert_eq!(ProfileKind::from_i64(kind.as_i64()), Some(kind));
        }
        assert_eq!(ProfileKind::from_i64(7), None);
    }

    #[test]
    fn test_remote_requires_url() {
        let mut profile = Profile::remote("r", "/tmp/r.json", "https://example.com/c.json");
        assert!(profile.validate().is_ok());

        profile.remote_url = None;
        assert!(matches!(
            profile.validate(),
            Err(StoreError::InvalidProfile(_))
        ));
    }

    #[test]
    fn test_local_rejects_url_and_auto_update() {
        let mut profile = Profile::local("l", "/tmp/l.json");
        profile.remote_url = Some("https://example.com".into());
        assert!(profile.validate().is_err());

        profile.remote_url = None;
        profile.auto_update = true;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(Profile::vault("  ", "a.json").validate().is_err());
    }
}
