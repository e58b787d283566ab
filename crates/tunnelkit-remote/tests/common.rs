#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tunnelkit_core::storage::{Database, SharedDatabase};
use tunnelkit_core::{ContentStore, JsonConfigChecker, Profile};
use tunnelkit_remote::{ContentFetcher, HttpFetcher, ProfileManager};

pub struct Fixture {
    pub dir: TempDir,
    pub manager: ProfileManager,
}

impl Fixture {
    pub fn new() -> Self {
        let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
        Self::with_fetcher(Arc::new(fetcher))
    }

    pub fn with_fetcher(fetcher: Arc<dyn ContentFetcher>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::in_memory().expect("Failed to create database");
        let content = ContentStore::new(dir.path().join("configs"), dir.path().join("vault"));
        let manager = ProfileManager::new(
            SharedDatabase::new(db),
            content,
            fetcher,
            Arc::new(JsonConfigChecker),
        );
        Self { dir, manager }
    }

    /// Store a remote profile with existing cached content, bypassing the fetch
    pub fn seed_remote(
        &self,
        name: &str,
        url: &str,
        content: &str,
        last_updated: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Profile {
        self.manager
            .database()
            .with_store(|store| {
                let id = store.next_id()?;
                let path = self.manager.content().create_cached(id, content)?;
                let mut profile = Profile::remote(name, path, url).with_id(id);
                profile.auto_update = true;
                profile.last_updated = last_updated;
                store.create(&mut profile)?;
                Ok(profile)
            })
            .expect("Failed to seed remote profile")
    }

    pub fn reload(&self, id: i64) -> Profile {
        self.manager
            .database()
            .with_store(|store| store.get(id))
            .expect("Failed to reload profile")
    }

    pub fn content_of(&self, profile: &Profile) -> String {
        self.manager
            .content()
            .read_content(profile)
            .expect("Failed to read content")
    }
}
