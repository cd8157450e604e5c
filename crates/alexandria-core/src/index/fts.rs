//! Full-Text Search
//!
//! Queries against the trigger-maintained FTS5 mirrors of events and memory
//! objects. Arbitrary user queries are quoted term-by-term before they reach
//! the FTS5 parser, so meta-characters cannot break the MATCH expression.

use rusqlite::params;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::Database;

/// A lexical hit with its normalized score and highlight fragment.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub id: String,
    pub fragment: Option<String>,
    /// BM25-derived score normalized to [0, 1] within the result set
    pub score: f32,
}

/// Quote and escape a raw query for FTS5 MATCH.
///
/// Each whitespace-separated term becomes a quoted string with embedded
/// quotes doubled; terms are OR-ed so partial matches still rank.
pub fn sanitize_match_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    terms.join(" OR ")
}

/// Lexical index over the `events_fts` and `memory_objects_fts` mirrors.
pub struct FtsIndex {
    db: Arc<Database>,
}

impl FtsIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Search event content. Results are relevance-ordered, scores in [0, 1].
    pub fn search_events(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        self.search_table("events_fts", query, limit)
    }

    /// Search memory content. Results are relevance-ordered, scores in [0, 1].
    pub fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        self.search_table("memory_objects_fts", query, limit)
    }

    fn search_table(&self, table: &str, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let sanitized = sanitize_match_query(query);
        if sanitized.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            "SELECT id, snippet({table}, 1, '[', ']', '…', 8), rank
             FROM {table}
             WHERE {table} MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        );

        let reader = self.db.read()?;
        let mut stmt = reader.prepare(&sql)?;
        let raw: Vec<(String, Option<String>, f64)> = stmt
            .query_map(params![sanitized, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        // FTS5 rank is negative BM25; flip so larger is better, then
        // normalize within the set like the hybrid fusion expects
        let scored: Vec<(String, Option<String>, f32)> = raw
            .into_iter()
            .map(|(id, frag, rank)| (id, frag, (-rank).max(0.0) as f32))
            .collect();

        let max_score = scored
            .iter()
            .map(|(_, _, s)| *s)
            .fold(0.0_f32, f32::max)
            .max(f32::EPSILON);

        Ok(scored
            .into_iter()
            .map(|(id, fragment, score)| FtsHit {
                id,
                fragment,
                score: score / max_score,
            })
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::content_hash;
    use crate::events::{EventLog, EventType, NewEvent};
    use crate::session::SessionStore;
    use chrono::Utc;

    #[test]
    fn test_sanitize_quotes_meta_characters() {
        assert_eq!(sanitize_match_query("hello"), "\"hello\"");
        assert_eq!(
            sanitize_match_query("a AND (b OR c)"),
            "\"a\" OR \"AND\" OR \"(b\" OR \"OR\" OR \"c)\""
        );
        assert_eq!(sanitize_match_query("say \"hi\""), "\"say\" OR \"\"\"hi\"\"\"");
        assert_eq!(sanitize_match_query("   "), "");
    }

    #[test]
    fn test_event_search_via_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("alexandria.db")).unwrap());
        let log = EventLog::new(db.clone());
        let sessions = SessionStore::new(db.clone());
        sessions.get_or_create("s1").unwrap();

        for content in [
            "the retriever fuses lexical and vector scores",
            "checkpoint triggers fire on tool bursts",
            "totally unrelated gardening advice",
        ] {
            log.append(
                "s1",
                NewEvent {
                    timestamp: Utc::now(),
                    event_type: EventType::Turn,
                    tool_name: None,
                    file_path: None,
                    exit_code: None,
                    content: content.to_string(),
                    content_hash: content_hash(content),
                },
            )
            .unwrap();
        }

        let fts = FtsIndex::new(db);
        let hits = fts.search_events("retriever lexical", 10).unwrap();
        assert!(!hits.is_empty());
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        // Query with FTS5 meta-characters must not error
        fts.search_events("NEAR(\"weird\" OR", 10).unwrap();
    }
}
