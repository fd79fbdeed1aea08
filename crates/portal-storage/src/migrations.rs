//! Schema migrations
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry in
//! [`MIGRATIONS`] moves the schema up by one version.

use rusqlite::Connection;

use crate::{Result, StorageError};

type Migration = fn(&Connection) -> Result<()>;

const MIGRATIONS: &[(&str, Migration)] = &[("settings and auth tokens", migrate_v1)];

pub(crate) fn schema_version() -> i32 {
    MIGRATIONS.len() as i32
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = schema_version();

    if found > target {
        return Err(StorageError::UnsupportedSchema(found));
    }

    for (index, (name, migrate)) in MIGRATIONS.iter().enumerate().skip(found.max(0) as usize) {
        let version = index as i32 + 1;
        tracing::info!(version, migration = name, "Applying schema migration");
        migrate(conn)?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    // auth_tokens holds a single row: the CHECK pins every write to slot 1
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS auth_tokens (
            slot INTEGER PRIMARY KEY CHECK (slot = 1),
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            access_expires_at TEXT NOT NULL,
            refresh_expires_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    )?;

    Ok(())
}
