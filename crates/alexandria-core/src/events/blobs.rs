//! Blob Store
//!
//! Opaque byte payloads for oversized event content, reference-counted by
//! the events that point at them.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::content::new_id;
use crate::error::Result;
use crate::storage::Database;

/// Store for opaque byte payloads keyed by ID.
pub struct BlobStore {
    db: Arc<Database>,
}

impl BlobStore {
    /// Create a new blob store over the shared database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a blob using an existing connection, so the caller can make the
    /// blob and its referencing event row atomic.
    pub(crate) fn insert_with(conn: &Connection, content: &str) -> rusqlite::Result<String> {
        let id = new_id();
        conn.execute(
            "INSERT INTO blobs (id, content, size, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                content.as_bytes(),
                content.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(id)
    }

    /// Fetch a blob's content as UTF-8 text.
    pub fn get(&self, id: &str) -> Result<Option<String>> {
        let reader = self.db.read()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row("SELECT content FROM blobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Number of stored blobs.
    pub fn count(&self) -> Result<i64> {
        let reader = self.db.read()?;
        let n = reader.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Delete blobs no event references. Returns the number swept.
    pub fn clean_orphaned(&self) -> Result<usize> {
        let writer = self.db.write()?;
        let swept = writer.execute(
            "DELETE FROM blobs WHERE id NOT IN
               (SELECT blob_id FROM events WHERE blob_id IS NOT NULL)",
            [],
        )?;
        if swept > 0 {
            tracing::warn!("swept {} orphaned blobs", swept);
        }
        Ok(swept)
    }
}
