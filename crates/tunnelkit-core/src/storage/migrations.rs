//! Database migrations
//!
//! Migrations are identified by name and recorded in `migration_history`
//! once applied. The list is append-only: never edit or reorder an entry
//! that has shipped, add a new one at the end instead.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::StoreError;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_profiles",
        sql: r#"
        CREATE TABLE profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            "order" INTEGER NOT NULL,
            path TEXT NOT NULL
        );
        "#,
    },
    Migration {
        name: "add_profile_type",
        sql: r"
        ALTER TABLE profiles ADD COLUMN type INTEGER NOT NULL DEFAULT 0;
        ",
    },
    Migration {
        name: "add_remote_fields",
        sql: r#"
        ALTER TABLE profiles ADD COLUMN remote_url TEXT;
        ALTER TABLE profiles ADD COLUMN auto_update INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE profiles ADD COLUMN last_updated TEXT;
        CREATE INDEX IF NOT EXISTS idx_profiles_order ON profiles("order");
        "#,
    },
];

/// Names of every registered migration, in application order
#[must_use]
pub fn registered() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|m| m.name).collect()
}

/// Run all pending migrations, returning the names applied by this call
///
/// # Errors
/// Returns an error if the ledger cannot be read or a migration fails
pub fn run_migrations(conn: &Connection) -> Result<Vec<&'static str>, StoreError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS migration_history (
            name TEXT PRIMARY KEY NOT NULL,
            applied_at TEXT NOT NULL
        );
        ",
    )?;

    let done = applied(conn)?;
    let mut newly_applied = Vec::new();

    for migration in MIGRATIONS {
        if done.iter().any(|name| name == migration.name) {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            StoreError::Migration(format!("{} failed: {e}", migration.name))
        })?;
        tx.execute(
            "INSERT INTO migration_history (name, applied_at) VALUES (?1, ?2)",
            params![migration.name, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        newly_applied.push(migration.name);
    }

    Ok(newly_applied)
}

/// Names recorded in the ledger, oldest first
///
/// # Errors
/// Returns an error if the ledger cannot be read
pub fn applied(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT name FROM migration_history ORDER BY rowid")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_applies_all_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        let applied_now = run_migrations(&conn).unwrap();
        assert_eq!(applied_now, registered());
        assert_eq!(applied(&conn).unwrap(), registered());
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert!(run_migrations(&conn).unwrap().is_empty());
        assert_eq!(applied(&conn).unwrap().len(), MIGRATIONS.len());
    }

    #[test]
    fn test_partial_ledger_upgrades_existing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE migration_history (name TEXT PRIMARY KEY NOT NULL, applied_at TEXT NOT NULL);
            CREATE TABLE profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                "order" INTEGER NOT NULL,
                path TEXT NOT NULL
            );
            INSERT INTO migration_history VALUES ('create_profiles', '2023-01-01T00:00:00Z');
            INSERT INTO profiles (name, "order", path) VALUES ('legacy', 0, '/tmp/legacy.json');
            "#,
        )
        .unwrap();

        let applied_now = run_migrations(&conn).unwrap();
        assert_eq!(applied_now, vec!["add_profile_type", "add_remote_fields"]);

        let (kind, auto_update): (i64, bool) = conn
            .query_row(
                "SELECT type, auto_update FROM profiles WHERE name = 'legacy'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(kind, 0);
        assert!(!auto_update);
    }
}
