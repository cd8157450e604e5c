//! Outcome Store
//!
//! Helpful / neutral / unhelpful feedback per memory. Each recorded outcome
//! recomputes the memory's `outcome_score` as the mean of the outcome
//! weights (helpful 1.0, neutral 0.5, unhelpful 0.0).

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::content::new_id;
use crate::error::{EngineError, Result};
use crate::storage::{parse_timestamp, Database};

/// Feedback about a memory's usefulness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Helpful,
    Neutral,
    Unhelpful,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Helpful => "helpful",
            OutcomeKind::Neutral => "neutral",
            OutcomeKind::Unhelpful => "unhelpful",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "helpful" => OutcomeKind::Helpful,
            "unhelpful" => OutcomeKind::Unhelpful,
            _ => OutcomeKind::Neutral,
        }
    }

    /// Score weight for the outcome-score mean.
    pub fn weight(&self) -> f64 {
        match self {
            OutcomeKind::Helpful => 1.0,
            OutcomeKind::Neutral => 0.5,
            OutcomeKind::Unhelpful => 0.0,
        }
    }
}

/// A recorded feedback event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub id: String,
    pub memory_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Store for outcome feedback.
pub struct OutcomeStore {
    db: Arc<Database>,
}

impl OutcomeStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record feedback for a memory and refresh its outcome score. The same
    /// (memory, session, outcome) may repeat; idempotence is by record id.
    pub fn record(
        &self,
        memory_id: &str,
        session_id: &str,
        outcome: OutcomeKind,
        context: Option<String>,
    ) -> Result<OutcomeRecord> {
        let id = new_id();
        let now = Utc::now();

        {
            let mut conn = self.db.write()?;
            let tx = conn.transaction()?;

            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM memory_objects WHERE id = ?1",
                params![memory_id],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(EngineError::not_found(format!("memory {}", memory_id)));
            }

            tx.execute(
                "INSERT INTO memory_outcomes (id, memory_id, session_id, timestamp, outcome, context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    memory_id,
                    session_id,
                    now.to_rfc3339(),
                    outcome.as_str(),
                    context
                ],
            )?;

            let score: f64 = tx.query_row(
                "SELECT AVG(CASE outcome
                    WHEN 'helpful' THEN 1.0
                    WHEN 'neutral' THEN 0.5
                    ELSE 0.0 END)
                 FROM memory_outcomes WHERE memory_id = ?1",
                params![memory_id],
                |row| row.get(0),
            )?;

            tx.execute(
                "UPDATE memory_objects SET outcome_score = ?1 WHERE id = ?2",
                params![score, memory_id],
            )?;

            tx.commit()?;
        }

        Ok(OutcomeRecord {
            id,
            memory_id: memory_id.to_string(),
            session_id: session_id.to_string(),
            timestamp: now,
            outcome,
            context,
        })
    }

    /// All feedback for one memory, oldest first.
    pub fn list_for_memory(&self, memory_id: &str) -> Result<Vec<OutcomeRecord>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT id, memory_id, session_id, timestamp, outcome, context
             FROM memory_outcomes WHERE memory_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![memory_id], |row| {
                let timestamp: String = row.get(3)?;
                let outcome: String = row.get(4)?;
                Ok(OutcomeRecord {
                    id: row.get(0)?,
                    memory_id: row.get(1)?,
                    session_id: row.get(2)?,
                    timestamp: parse_timestamp(&timestamp, "timestamp")?,
                    outcome: OutcomeKind::parse_name(&outcome),
                    context: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ============================================================================
// TESTS
// ============================================================================
