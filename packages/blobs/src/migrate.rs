//! Forward-only schema migrations.
//!
//! Each step is an idempotent DDL batch. The applied count is tracked in
//! `PRAGMA user_version`; a database is migrated by running every step at
//! or past its version, in order. Steps are never edited or reordered once
//! shipped, only appended.

use rusqlite::Connection;
use tracing::debug;

use crate::Result;

const MIGRATIONS: &[&str] = &[
    // v1: blob layer.
    "CREATE TABLE IF NOT EXISTS blobs (
         id   BLOB PRIMARY KEY,
         salt BLOB,
         data BLOB NOT NULL
     ) WITHOUT ROWID;
     CREATE TABLE IF NOT EXISTS stores (
         id INTEGER PRIMARY KEY AUTOINCREMENT
     );
     CREATE TABLE IF NOT EXISTS store_blobs (
         store_id INTEGER NOT NULL,
         blob_id  BLOB NOT NULL,
         PRIMARY KEY (store_id, blob_id)
     ) WITHOUT ROWID;
     CREATE INDEX IF NOT EXISTS store_blobs_by_blob ON store_blobs (blob_id);",
    // v2: pods and their namespaces.
    "CREATE TABLE IF NOT EXISTS pods (
         id           INTEGER PRIMARY KEY AUTOINCREMENT,
         store_id     INTEGER NOT NULL,
         secret       BLOB NOT NULL,
         last_proc_id INTEGER NOT NULL DEFAULT 0,
         dead_lteq    INTEGER NOT NULL DEFAULT 0,
         config       TEXT NOT NULL DEFAULT '{}',
         created_at   TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
     );
     CREATE TABLE IF NOT EXISTS pod_ns (
         pod_id INTEGER NOT NULL,
         k      TEXT NOT NULL,
         v      BLOB NOT NULL,
         PRIMARY KEY (pod_id, k)
     ) WITHOUT ROWID;",
];

/// Bring `conn` up to the current schema version.
pub fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 =
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for (i, step) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        conn.execute_batch(step)?;
        conn.pragma_update(None, "user_version", i as i64 + 1)?;
        debug!(version = i + 1, "applied schema migration");
    }
    Ok(())
}
