//! Event Log
//!
//! Append-only store of normalized events. Large content is offloaded to a
//! blob in the same transaction as the event row; session counters are
//! bumped in that transaction as well so they are never observed mid-append.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use crate::content::{estimate_tokens, new_id, INLINE_TOKEN_LIMIT};
use crate::error::{EngineError, Result};
use crate::events::{BlobStore, Event, EventType};
use crate::storage::{parse_timestamp, Database};

/// A normalized event ready for insertion.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub tool_name: Option<String>,
    pub file_path: Option<String>,
    pub exit_code: Option<i64>,
    pub content: String,
    pub content_hash: String,
}

/// Append-only event log.
pub struct EventLog {
    db: Arc<Database>,
}

impl EventLog {
    /// Create a new log over the shared database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an event. Content whose token estimate exceeds the inline
    /// limit is offloaded to a blob atomically with the event row. Bumps the
    /// owning session's `events_count` and `events_since_checkpoint`.
    pub fn append(&self, session_id: &str, new: NewEvent) -> Result<Event> {
        let id = new_id();
        let token_count = estimate_tokens(&new.content);

        let mut conn = self.db.write()?;
        let tx = conn.transaction()?;

        let (inline, blob_id) = if token_count > INLINE_TOKEN_LIMIT {
            let blob_id = BlobStore::insert_with(&tx, &new.content)?;
            (None, Some(blob_id))
        } else {
            (Some(new.content.as_str()), None)
        };

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM events",
            [],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO events (
                id, session_id, seq, timestamp, event_type, content, blob_id,
                tool_name, file_path, exit_code, content_hash, token_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                session_id,
                seq,
                new.timestamp.to_rfc3339(),
                new.event_type.as_str(),
                inline,
                blob_id,
                new.tool_name,
                new.file_path,
                new.exit_code,
                new.content_hash,
                token_count,
            ],
        )?;

        tx.execute(
            "UPDATE sessions SET
                events_count = events_count + 1,
                events_since_checkpoint = events_since_checkpoint + 1
             WHERE id = ?1",
            params![session_id],
        )?;

        tx.commit()?;
        drop(conn);

        self.get(&id)?
            .ok_or_else(|| EngineError::not_found(format!("event {}", id)))
    }

    /// Get an event by ID.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        let reader = self.db.read()?;
        let event = reader
            .query_row(
                "SELECT * FROM events WHERE id = ?1",
                params![id],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    /// All events of a session, timestamp ascending with stable
    /// insertion-order tie-break.
    pub fn get_by_session(&self, session_id: &str) -> Result<Vec<Event>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM events WHERE session_id = ?1 ORDER BY timestamp ASC, seq ASC",
        )?;
        let events = stmt
            .query_map(params![session_id], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Session events strictly after `since`.
    pub fn get_by_session_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM events
             WHERE session_id = ?1 AND timestamp > ?2
             ORDER BY timestamp ASC, seq ASC",
        )?;
        let events = stmt
            .query_map(params![session_id, since.to_rfc3339()], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// The `n` most recent events across sessions, newest first.
    pub fn get_recent(&self, n: usize) -> Result<Vec<Event>> {
        let reader = self.db.read()?;
        let mut stmt = reader
            .prepare("SELECT * FROM events ORDER BY timestamp DESC, seq DESC LIMIT ?1")?;
        let events = stmt
            .query_map(params![n as i64], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Resolve an event's content, inline or from its blob.
    pub fn get_content(&self, event: &Event) -> Result<String> {
        if let Some(content) = &event.content {
            return Ok(content.clone());
        }
        let blob_id = event
            .blob_id
            .as_deref()
            .ok_or_else(|| EngineError::not_found(format!("content of event {}", event.id)))?;
        let reader = self.db.read()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT content FROM blobs WHERE id = ?1",
                params![blob_id],
                |row| row.get(0),
            )
            .optional()?;
        bytes
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .ok_or_else(|| EngineError::not_found(format!("blob {}", blob_id)))
    }

    /// Whether any event carries this content hash.
    pub fn exists_by_hash(&self, hash: &str) -> Result<bool> {
        let reader = self.db.read()?;
        let n: i64 = reader.query_row(
            "SELECT COUNT(*) FROM events WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Total event count.
    pub fn count(&self) -> Result<i64> {
        let reader = self.db.read()?;
        let n = reader.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Event count for one session.
    pub fn count_by_session(&self, session_id: &str) -> Result<i64> {
        let reader = self.db.read()?;
        let n = reader.query_row(
            "SELECT COUNT(*) FROM events WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
        let timestamp: String = row.get("timestamp")?;
        let event_type: String = row.get("event_type")?;
        Ok(Event {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            timestamp: parse_timestamp(&timestamp, "timestamp")?,
            event_type: EventType::parse_name(&event_type),
            tool_name: row.get("tool_name")?,
            file_path: row.get("file_path")?,
            exit_code: row.get("exit_code")?,
            content: row.get("content")?,
            blob_id: row.get("blob_id")?,
            content_hash: row.get("content_hash")?,
            token_count: row.get("token_count")?,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
