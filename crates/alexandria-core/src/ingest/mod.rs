//! Ingestor
//!
//! The write-side facade: normalize raw content, append to the event log,
//! feed the vector index, track session signals and push the event into the
//! checkpoint buffer. Embedding or curation failures degrade; they never
//! fail an ingest.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::checkpoint::{CheckpointEngine, CheckpointOutcome};
use crate::curate::EpisodeEvent;
use crate::error::Result;
use crate::events::{Event, EventLog, EventType, NewEvent};
use crate::index::VectorStore;
use crate::normalize::{normalize, EventMeta, NormalizerConfig};
use crate::session::SessionStore;

/// One ingest request.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub session_id: String,
    pub content: String,
    /// Force the event type instead of classifying
    pub event_type: Option<EventType>,
    pub tool_name: Option<String>,
    pub file_path: Option<String>,
    pub exit_code: Option<i64>,
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

/// What one ingest did.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub event: Event,
    /// An event with identical content already existed
    pub duplicate: bool,
    /// Set when the ingest tripped a checkpoint
    pub checkpoint: Option<CheckpointOutcome>,
}

/// Write-side facade over log, indexes, sessions and checkpointing.
pub struct Ingestor {
    log: Arc<EventLog>,
    vectors: Arc<VectorStore>,
    sessions: Arc<SessionStore>,
    checkpoint: Arc<CheckpointEngine>,
    normalizer: NormalizerConfig,
}

impl Ingestor {
    pub fn new(
        log: Arc<EventLog>,
        vectors: Arc<VectorStore>,
        sessions: Arc<SessionStore>,
        checkpoint: Arc<CheckpointEngine>,
        normalizer: NormalizerConfig,
    ) -> Self {
        Self {
            log,
            vectors,
            sessions,
            checkpoint,
            normalizer,
        }
    }

    /// Ingest one event end to end.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt> {
        self.sessions.get_or_create(&request.session_id)?;

        let meta = EventMeta {
            tool_name: request.tool_name.as_deref(),
            file_path: request.file_path.as_deref(),
            exit_code: request.exit_code,
        };
        let normalized = normalize(&request.content, request.event_type, &meta, &self.normalizer);
        let duplicate = self.log.exists_by_hash(&normalized.content_hash)?;

        // Oversized content embeds by synopsis; the blob holds the rest
        let embed_text = normalized
            .synopsis
            .clone()
            .filter(|_| normalized.should_blob)
            .unwrap_or_else(|| normalized.content.clone());

        let event = self.log.append(
            &request.session_id,
            NewEvent {
                timestamp: request.timestamp.unwrap_or_else(Utc::now),
                event_type: normalized.event_type,
                tool_name: request.tool_name.clone(),
                file_path: request.file_path.clone(),
                exit_code: request.exit_code.or(normalized.signals.exit_code),
                content: normalized.content.clone(),
                content_hash: normalized.content_hash.clone(),
            },
        )?;

        if let Err(e) = self.vectors.index_event(&event.id, &embed_text) {
            tracing::debug!("event vector indexing degraded: {}", e);
        }

        if normalized.event_type == EventType::Error
            || event.exit_code.is_some_and(|c| c != 0)
        {
            self.sessions.record_error(&request.session_id)?;
        }
        if request.file_path.is_some() {
            self.sessions.set_working(
                &request.session_id,
                None,
                request.file_path.as_deref(),
                None,
            )?;
        }

        let checkpoint = self.checkpoint.add_event(
            &request.session_id,
            EpisodeEvent {
                event: event.clone(),
                content: normalized.content,
            },
        )?;

        Ok(IngestReceipt {
            event,
            duplicate,
            checkpoint,
        })
    }

    /// Ingest a conversational turn.
    pub fn ingest_turn(&self, session_id: &str, content: &str) -> Result<IngestReceipt> {
        self.ingest(IngestRequest {
            session_id: session_id.to_string(),
            content: content.to_string(),
            event_type: Some(EventType::Turn),
            ..Default::default()
        })
    }

    /// Ingest a tool invocation's output.
    pub fn ingest_tool_output(
        &self,
        session_id: &str,
        tool_name: &str,
        content: &str,
        exit_code: Option<i64>,
    ) -> Result<IngestReceipt> {
        self.ingest(IngestRequest {
            session_id: session_id.to_string(),
            content: content.to_string(),
            event_type: Some(EventType::ToolOutput),
            tool_name: Some(tool_name.to_string()),
            exit_code,
            ..Default::default()
        })
    }

    /// Ingest a unified diff.
    pub fn ingest_diff(
        &self,
        session_id: &str,
        content: &str,
        file_path: Option<&str>,
    ) -> Result<IngestReceipt> {
        self.ingest(IngestRequest {
            session_id: session_id.to_string(),
            content: content.to_string(),
            event_type: Some(EventType::Diff),
            file_path: file_path.map(str::to_string),
            ..Default::default()
        })
    }

    /// Ingest an error payload.
    pub fn ingest_error(&self, session_id: &str, content: &str) -> Result<IngestReceipt> {
        self.ingest(IngestRequest {
            session_id: session_id.to_string(),
            content: content.to_string(),
            event_type: Some(EventType::Error),
            ..Default::default()
        })
    }

    /// Ingest a test-run summary.
    pub fn ingest_test_summary(&self, session_id: &str, content: &str) -> Result<IngestReceipt> {
        self.ingest(IngestRequest {
            session_id: session_id.to_string(),
            content: content.to_string(),
            event_type: Some(EventType::TestSummary),
            ..Default::default()
        })
    }

    /// Run a manual checkpoint now.
    pub fn trigger_checkpoint(&self, session_id: &str) -> Result<CheckpointOutcome> {
        self.checkpoint.checkpoint_now(session_id)
    }

    /// Flush any buffered events through a final checkpoint, typically at
    /// session end.
    pub fn flush_checkpoint(&self, session_id: &str) -> Result<CheckpointOutcome> {
        if self.checkpoint.buffered() == 0 {
            return Ok(CheckpointOutcome::default());
        }
        self.checkpoint.checkpoint_now(session_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointConfig, CheckpointEngine};
    use crate::conflict::ConflictQueue;
    use crate::curate::CurationTier;
    use crate::index::FtsIndex;
    use crate::memory::MemoryStore;
    use crate::storage::Database;

    fn build() -> (tempfile::TempDir, Arc<EventLog>, Arc<SessionStore>, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("alexandria.db")).unwrap());
        let log = Arc::new(EventLog::new(db.clone()));
        let vectors = Arc::new(VectorStore::new(db.clone(), None).unwrap());
        let store = Arc::new(MemoryStore::new(db.clone(), vectors.clone()));
        let sessions = Arc::new(SessionStore::new(db.clone()));
        let fts = Arc::new(FtsIndex::new(db.clone()));
        let queue = Arc::new(ConflictQueue::new(db));
        let checkpoint = Arc::new(CheckpointEngine::new(
            CheckpointConfig::default(),
            CurationTier::Rules,
            store,
            fts,
            sessions.clone(),
            queue,
            None,
        ));
        let ingestor = Ingestor::new(
            log.clone(),
            vectors,
            sessions.clone(),
            checkpoint,
            NormalizerConfig::default(),
        );
        (dir, log, sessions, ingestor)
    }

    #[test]
    fn test_ingest_turn_classifies_and_counts() {
        let (_dir, log, sessions, ingestor) = build();
        let receipt = ingestor
            .ingest_turn("s1", "Working through the retriever module today")
            .unwrap();
        assert_eq!(receipt.event.event_type, EventType::Turn);
        assert!(!receipt.duplicate);
        assert_eq!(log.count_by_session("s1").unwrap(), 1);
        assert_eq!(sessions.require("s1").unwrap().events_count, 1);
    }

    #[test]
    fn test_duplicate_flag_on_second_identical_ingest() {
        let (_dir, log, _sessions, ingestor) = build();
        let first = ingestor.ingest_turn("s1", "exactly the same words").unwrap();
        let second = ingestor.ingest_turn("s1", "exactly the same words").unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        // Both persisted: the log is append-only
        assert_eq!(log.count().unwrap(), 2);
        assert_eq!(first.event.content_hash, second.event.content_hash);
    }

    #[test]
    fn test_error_ingest_bumps_burst_counter() {
        let (_dir, _log, sessions, ingestor) = build();
        ingestor
            .ingest_error("s1", "error: connection refused by upstream")
            .unwrap();
        ingestor
            .ingest_tool_output("s1", "bash", "error: still refused", Some(1))
            .unwrap();
        assert_eq!(sessions.require("s1").unwrap().error_count, 2);
    }

    #[test]
    fn test_classification_when_type_not_forced() {
        let (_dir, _log, _sessions, ingestor) = build();
        let receipt = ingestor
            .ingest(IngestRequest {
                session_id: "s1".into(),
                content: "--- a/x.rs\n+++ b/x.rs\n@@ -1 +1 @@\n-a\n+b".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(receipt.event.event_type, EventType::Diff);
    }

    #[test]
    fn test_flush_on_empty_buffer_is_noop() {
        let (_dir, _log, _sessions, ingestor) = build();
        let outcome = ingestor.flush_checkpoint("s1").unwrap();
        assert_eq!(outcome, CheckpointOutcome::default());
    }
}
