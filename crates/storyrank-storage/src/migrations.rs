//! Database schema migrations.
//!
//! Applies the item schema and tracks applied versions in
//! `schema_migrations`. Also hosts the destructive reset used when the
//! store is configured to start empty.

use rusqlite::Connection;
use tracing::info;

use storyrank_core::error::StoryrankError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), StoryrankError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| StoryrankError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoryrankError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: items");
    }

    Ok(())
}

/// Drop every table this crate owns. All ingested items are lost.
///
/// Callers run [`run_migrations`] afterwards to recreate an empty schema.
pub fn reset_schema(conn: &Connection) -> Result<(), StoryrankError> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS items;
         DROP TABLE IF EXISTS schema_migrations;",
    )
    .map_err(|e| StoryrankError::Storage(format!("Failed to reset schema: {}", e)))?;
    info!("Item schema dropped");
    Ok(())
}

/// Version 1: one row per item, embedding stored as a JSON array.
fn apply_v1(conn: &Connection) -> Result<(), StoryrankError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS items (
            id              INTEGER PRIMARY KEY NOT NULL,
            kind            TEXT NOT NULL DEFAULT 'story',
            title           TEXT NOT NULL,
            url             TEXT,
            text            TEXT,
            score           INTEGER,
            author          TEXT,
            posted_at       INTEGER,
            embedding       TEXT NOT NULL,
            dimensions      INTEGER NOT NULL,
            ingested_at     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_ingested_at
            ON items (ingested_at ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'items');
        ",
    )
    .map_err(|e| StoryrankError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
