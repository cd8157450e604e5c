//! Storage Layer
//!
//! One embedded SQLite database per project. The [`Database`] value owns a
//! writer and a reader connection behind mutexes so every component that
//! holds an `Arc<Database>` is `Send + Sync`. There is no global handle
//! cache; callers that want a different path open a different [`Database`].

pub mod migrations;
pub mod paths;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{EngineError, Result};

pub use paths::{resolve_db_path, ProjectPaths};

/// Shared database handle with separate reader/writer connections.
pub struct Database {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            // Restrict directory permissions to owner-only on Unix
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o700);
                let _ = std::fs::set_permissions(parent, perms);
            }
        }

        let writer_conn = Connection::open(path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        Self::configure_connection(&writer_conn)?;

        // Apply migrations on writer only
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            path: path.to_path_buf(),
        })
    }

    /// Path this database was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the writer connection.
    pub(crate) fn write(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| EngineError::Lock("writer"))
    }

    /// Lock the reader connection.
    pub(crate) fn read(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|_| EngineError::Lock("reader"))
    }
}

/// Parse an RFC3339 timestamp stored in a TEXT column.
pub(crate) fn parse_timestamp(
    value: &str,
    field_name: &str,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid {} timestamp '{}': {}", field_name, value, e),
                )),
            )
        })
}

/// Parse an optional RFC3339 timestamp, tolerating NULL and garbage.
pub(crate) fn parse_timestamp_opt(
    value: Option<String>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    value.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .ok()
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("alexandria.db")).unwrap();

        let reader = db.read().unwrap();
        let count: i64 = reader
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='memory_objects'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alexandria.db");
        drop(Database::open(&path).unwrap());
        // Second open re-runs apply_migrations; versions already applied skip
        let db = Database::open(&path).unwrap();
        let reader = db.read().unwrap();
        let version: u32 = reader
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, migrations::MIGRATIONS.last().unwrap().version);
    }
}
