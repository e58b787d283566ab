//! Database connection management

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use super::migrations;
use super::profiles::ProfileStore;
use crate::error::StoreError;

/// Database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    ///
    /// Pending migrations are applied before the handle is returned.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL lets observer processes read while the daemon writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let applied = migrations::run_migrations(&conn)?;
        if !applied.is_empty() {
            tracing::info!(path = %path.display(), ?applied, "applied profile store migrations");
        }

        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing)
    ///
    /// # Errors
    /// Returns an error if the database cannot be created
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the connection
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Database handle shared between tasks of one process
///
/// The connection is only locked for the duration of a synchronous store
/// call, never across an await point.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    /// Wrap an open database
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against a profile store over the shared connection
    ///
    /// # Errors
    /// Returns whatever `f` returns
    pub fn with_store<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&ProfileStore<'_>) -> Result<T, StoreError>,
    {
        // Handle mutex poisoning by recovering the lock
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&ProfileStore::new(guard.connection()))
    }
}
