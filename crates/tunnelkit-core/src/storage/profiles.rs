//! Profile storage operations (CRUD)
//!
//! Each call is its own transaction. The batch forms apply item by item and
//! stop at the first failure, so items before the failing one stay committed.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::StoreError;
use crate::profile::{Profile, ProfileKind};

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, "order", type, path, remote_url, auto_update, last_updated
    FROM profiles
"#;

/// Profile storage operations
pub struct ProfileStore<'a> {
    conn: &'a Connection,
}

impl<'a> ProfileStore<'a> {
    /// Create a new profile store
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Number of stored profiles
    ///
    /// # Errors
    /// Returns an error if the table cannot be queried
    pub fn count(&self) -> Result<u32, StoreError> {
        let count: u32 = self
            .conn
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(count)
    }

    /// The `order` a newly created profile receives
    ///
    /// # Errors
    /// Returns an error if the table cannot be queried
    pub fn next_order(&self) -> Result<u32, StoreError> {
        self.count()
    }

    /// One past the highest id in use (1 for an empty table)
    ///
    /// Used to name a profile's content file before its row exists.
    ///
    /// # Errors
    /// Returns an error if the table cannot be queried
    pub fn next_id(&self) -> Result<i64, StoreError> {
        let id: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM profiles",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Create a new profile at the end of the order
    ///
    /// An explicit `profile.id` is kept; otherwise the next id is assigned.
    /// On success the assigned id and order are written back into `profile`.
    ///
    /// # Errors
    /// Returns `Conflict` if the explicit id is taken, `InvalidProfile` if
    /// the record breaks an invariant
    pub fn create(&self, profile: &mut Profile) -> Result<i64, StoreError> {
        profile.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        let order: u32 = tx.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;

        let inserted = tx.execute(
            r#"
            INSERT INTO profiles (id, name, "order", type, path, remote_url, auto_update, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                profile.id,
                profile.name,
                order,
                profile.kind.as_i64(),
                profile.path,
                profile.remote_url,
                profile.auto_update,
                profile.last_updated.map(|t| t.to_rfc3339()),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Conflict(profile.id.unwrap_or_default()));
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;

        profile.id = Some(id);
        profile.order = order;
        tracing::debug!(profile_id = id, order, name = %profile.name, "created profile");
        Ok(id)
    }

    /// Get a profile by ID
    ///
    /// # Errors
    /// Returns `NotFound` if no such profile exists
    pub fn get(&self, id: i64) -> Result<Profile, StoreError> {
        self.find(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Look up a profile that may have been deleted
    ///
    /// # Errors
    /// Returns an error if the profile cannot be retrieved
    pub fn find(&self, id: i64) -> Result<Option<Profile>, StoreError> {
        fetch(self.conn, id)
    }

    /// List all profiles, ascending by `order`
    ///
    /// # Errors
    /// Returns an error if the profiles cannot be listed
    pub fn list(&self) -> Result<Vec<Profile>, StoreError> {
        self.query_all(&format!(r#"{SELECT_COLUMNS} ORDER BY "order", id"#))
    }

    /// List the profiles with auto-update enabled, ascending by `order`
    ///
    /// # Errors
    /// Returns an error if the profiles cannot be listed
    pub fn list_auto_update_enabled(&self) -> Result<Vec<Profile>, StoreError> {
        self.query_all(&format!(
            r#"{SELECT_COLUMNS} WHERE auto_update = 1 ORDER BY "order", id"#
        ))
    }

    /// Persist the fields of `profile` that differ from the stored row
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    /// Returns `NotFound` if the row is gone, `InvalidProfile` if the record
    /// has no id or breaks an invariant
    pub fn update(&self, profile: &Profile) -> Result<bool, StoreError> {
        let id = profile
            .id
            .ok_or_else(|| StoreError::InvalidProfile("profile has no id".into()))?;
        profile.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        let current = fetch(&tx, id)?.ok_or(StoreError::NotFound(id))?;

        let changes = changed_columns(&current, profile);
        if changes.is_empty() {
            return Ok(false);
        }

        let assignments = changes
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("\"{column}\" = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE profiles SET {assignments} WHERE id = ?{}",
            changes.len() + 1
        );

        let mut values: Vec<Value> = changes.into_iter().map(|(_, value)| value).collect();
        values.push(Value::Integer(id));

        tx.execute(&sql, params_from_iter(values))?;
        tx.commit()?;
        Ok(true)
    }

    /// Update each profile in turn
    ///
    /// Not atomic across items: on error, earlier items remain committed.
    /// Returns how many profiles had changes written.
    ///
    /// # Errors
    /// Returns the first item's error
    pub fn update_batch(&self, profiles: &[Profile]) -> Result<usize, StoreError> {
        let mut written = 0;
        for profile in profiles {
            if self.update(profile)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Rewrite `order` as `0..n-1` following `ids`
    ///
    /// Callers use this to re-pack after a delete or a move; the store never
    /// renumbers on its own. Goes through [`Self::update_batch`].
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id
    pub fn reorder(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut profiles = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let mut profile = self.get(*id)?;
            profile.order = u32::try_from(index)
                .map_err(|_| StoreError::InvalidProfile("too many profiles".into()))?;
            profiles.push(profile);
        }
        self.update_batch(&profiles)
    }

    /// Delete a profile
    ///
    /// Survivors keep their `order`; callers re-pack with [`Self::reorder`].
    ///
    /// # Errors
    /// Returns an error if the profile cannot be deleted
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Delete each id in turn, returning how many rows went away
    ///
    /// Not atomic across items: on error, earlier deletions remain.
    ///
    /// # Errors
    /// Returns the first failing deletion's error
    pub fn delete_batch(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(*id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn query_all(&self, sql: &str) -> Result<Vec<Profile>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], ProfileRow::from_row)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?.into_profile()?);
        }
        Ok(profiles)
    }
}

fn fetch(conn: &Connection, id: i64) -> Result<Option<Profile>, StoreError> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            ProfileRow::from_row,
        )
        .optional()?;
    row.map(ProfileRow::into_profile).transpose()
}

/// Raw column values before decoding
struct ProfileRow {
    id: i64,
    name: String,
    order: u32,
    kind: i64,
    path: String,
    remote_url: Option<String>,
    auto_update: bool,
    last_updated: Option<String>,
}

impl ProfileRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            order: row.get(2)?,
            kind: row.get(3)?,
            path: row.get(4)?,
            remote_url: row.get(5)?,
            auto_update: row.get(6)?,
            last_updated: row.get(7)?,
        })
    }

    fn into_profile(self) -> Result<Profile, StoreError> {
        let kind = ProfileKind::from_i64(self.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("profile {}: unknown type {}", self.id, self.kind))
        })?;
        let last_updated = self
            .last_updated
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        StoreError::Corrupt(format!("profile {}: invalid datetime: {e}", self.id))
                    })
            })
            .transpose()?;

        Ok(Profile {
            id: Some(self.id),
            name: self.name,
            order: self.order,
            kind,
            path: self.path,
            remote_url: self.remote_url,
            auto_update: self.auto_update,
            last_updated,
        })
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn optional_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

/// Columns whose values differ between `stored` and `wanted`
fn changed_columns(stored: &Profile, wanted: &Profile) -> Vec<(&'static str, Value)> {
    let mut changes = Vec::new();
    if stored.name != wanted.name {
        changes.push(("name", text(&wanted.name)));
    }
    if stored.order != wanted.order {
        changes.push(("order", Value::Integer(i64::from(wanted.order))));
    }
    if stored.kind != wanted.kind {
        changes.push(("type", Value::Integer(wanted.kind.as_i64())));
    }
    if stored.path != wanted.path {
        changes.push(("path", text(&wanted.path)));
    }
    if stored.remote_url != wanted.remote_url {
        changes.push(("remote_url", optional_text(wanted.remote_url.clone())));
    }
    if stored.auto_update != wanted.auto_update {
        changes.push(("auto_update", Value::Integer(i64::from(wanted.auto_update))));
    }
    if stored.last_updated != wanted.last_updated {
        changes.push((
            "last_updated",
            optional_text(wanted.last_updated.map(|t| t.to_rfc3339())),
        ));
    }
    changes
}
