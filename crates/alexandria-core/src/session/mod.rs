//! Session Store
//!
//! Per-session bookkeeping: counters, checkpoint state, the ordered set of
//! memories already injected, disclosure level and error bursts.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::storage::{parse_timestamp, parse_timestamp_opt, Database};

/// Progressive disclosure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisclosureLevel {
    #[default]
    Minimal,
    Task,
    Deep,
}

impl DisclosureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisclosureLevel::Minimal => "minimal",
            DisclosureLevel::Task => "task",
            DisclosureLevel::Deep => "deep",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "task" => DisclosureLevel::Task,
            "deep" => DisclosureLevel::Deep,
            _ => DisclosureLevel::Minimal,
        }
    }

    /// Default token budget for packs at this level.
    pub fn default_budget(&self) -> i64 {
        match self {
            DisclosureLevel::Minimal => 500,
            DisclosureLevel::Task => 2000,
            DisclosureLevel::Deep => 4000,
        }
    }
}

/// Per-session state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub events_count: i64,
    pub objects_created: i64,
    pub objects_accessed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub events_since_checkpoint: i64,
    pub injected_memory_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disclosure_at: Option<DateTime<Utc>>,
    pub error_count: i64,
    pub disclosure_level: DisclosureLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_topic: Option<String>,
}

/// Store for session rows.
pub struct SessionStore {
    db: Arc<Database>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch a session.
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let reader = self.db.read()?;
        let session = reader
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Fetch a session or fail with NotFound.
    pub fn require(&self, id: &str) -> Result<Session> {
        self.get(id)?
            .ok_or_else(|| EngineError::not_found(format!("session {}", id)))
    }

    /// Create the session on first activity; later calls return the row.
    pub fn get_or_create(&self, id: &str) -> Result<Session> {
        if let Some(existing) = self.get(id)? {
            return Ok(existing);
        }
        let writer = self.db.write()?;
        writer.execute(
            "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )?;
        drop(writer);
        self.require(id)
    }

    /// End a session once. Ending twice is a validation error.
    pub fn end(&self, id: &str, summary: Option<String>) -> Result<Session> {
        let session = self.require(id)?;
        if session.ended_at.is_some() {
            return Err(EngineError::validation(format!(
                "session {} already ended",
                id
            )));
        }
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE sessions SET ended_at = ?1, summary = COALESCE(?2, summary) WHERE id = ?3",
            params![Utc::now().to_rfc3339(), summary, id],
        )?;
        drop(writer);
        self.require(id)
    }

    /// Update working context; a changed file also becomes the last topic.
    pub fn set_working(
        &self,
        id: &str,
        directory: Option<&str>,
        file: Option<&str>,
        task: Option<&str>,
    ) -> Result<()> {
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE sessions SET
                working_directory = COALESCE(?1, working_directory),
                working_file = COALESCE(?2, working_file),
                working_task = COALESCE(?3, working_task),
                last_topic = COALESCE(?2, last_topic)
             WHERE id = ?4",
            params![directory, file, task, id],
        )?;
        Ok(())
    }

    /// Record a completed checkpoint: reset the since-checkpoint counter and
    /// credit created objects.
    pub fn mark_checkpoint(&self, id: &str, objects_created: i64) -> Result<()> {
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE sessions SET
                last_checkpoint_at = ?1,
                events_since_checkpoint = 0,
                objects_created = objects_created + ?2
             WHERE id = ?3",
            params![Utc::now().to_rfc3339(), objects_created, id],
        )?;
        Ok(())
    }

    /// Bump the error burst counter.
    pub fn record_error(&self, id: &str) -> Result<()> {
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE sessions SET error_count = error_count + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Record a served context pack: extend the injected set, stamp the
    /// disclosure, optionally reset the error burst.
    pub fn record_disclosure(
        &self,
        id: &str,
        level: DisclosureLevel,
        new_memory_ids: &[String],
        reset_errors: bool,
    ) -> Result<()> {
        let session = self.require(id)?;
        let mut injected = session.injected_memory_ids;
        for m in new_memory_ids {
            if !injected.contains(m) {
                injected.push(m.clone());
            }
        }
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE sessions SET
                injected_memory_ids = ?1,
                last_disclosure_at = ?2,
                disclosure_level = ?3,
                objects_accessed = objects_accessed + ?4,
                error_count = CASE WHEN ?5 THEN 0 ELSE error_count END
             WHERE id = ?6",
            params![
                serde_json::to_string(&injected)?,
                Utc::now().to_rfc3339(),
                level.as_str(),
                new_memory_ids.len() as i64,
                reset_errors,
                id
            ],
        )?;
        Ok(())
    }

    /// Total session count.
    pub fn count(&self) -> Result<i64> {
        let reader = self.db.read()?;
        let n = reader.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(n)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        let started_at: String = row.get("started_at")?;
        let injected_json: String = row.get("injected_memory_ids")?;
        let disclosure: String = row.get("disclosure_level")?;
        Ok(Session {
            id: row.get("id")?,
            started_at: parse_timestamp(&started_at, "started_at")?,
            ended_at: parse_timestamp_opt(row.get("ended_at")?),
            working_directory: row.get("working_directory")?,
            working_file: row.get("working_file")?,
            working_task: row.get("working_task")?,
            summary: row.get("summary")?,
            events_count: row.get("events_count")?,
            objects_created: row.get("objects_created")?,
            objects_accessed: row.get("objects_accessed")?,
            last_checkpoint_at: parse_timestamp_opt(row.get("last_checkpoint_at")?),
            events_since_checkpoint: row.get("events_since_checkpoint")?,
            injected_memory_ids: serde_json::from_str(&injected_json).unwrap_or_default(),
            last_disclosure_at: parse_timestamp_opt(row.get("last_disclosure_at")?),
            error_count: row.get("error_count")?,
            disclosure_level: DisclosureLevel::parse_name(&disclosure),
            last_topic: row.get("last_topic")?,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
