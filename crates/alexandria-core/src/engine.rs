//! Engine
//!
//! The explicit aggregate owning one project database and every component
//! built over it. There is no global handle cache: open two engines and you
//! have two databases. Capabilities (embedder, language model, code truth)
//! are injected at construction and default to absent, which degrades the
//! relevant features instead of failing them.

use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::{CheckpointConfig, CheckpointEngine};
use crate::conflict::ConflictQueue;
use crate::curate::{CurationTier, LanguageModel, LlmCurator};
use crate::error::Result;
use crate::events::{BlobStore, EventLog};
use crate::index::{Embedder, FtsIndex, TokenIndex, VectorStore};
use crate::ingest::Ingestor;
use crate::memory::{MemoryStatus, MemoryStore};
use crate::normalize::NormalizerConfig;
use crate::outcome::OutcomeStore;
use crate::retrieval::Retriever;
use crate::session::SessionStore;
use crate::storage::{resolve_db_path, Database};
use crate::truth::{CodeTruth, StalenessChecker};

/// Construction options for [`Engine::open`].
#[derive(Default)]
pub struct EngineOptions {
    /// Explicit database file; wins over project discovery
    pub db_path: Option<PathBuf>,
    /// Project root used for the per-project database layout
    pub project_root: Option<PathBuf>,
    /// Embedding model; absent disables the vector legs
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Language model; absent limits curation to the rule tier
    pub model: Option<Arc<dyn LanguageModel>>,
    /// Code-truth bridge; absent disables staleness checking
    pub truth: Option<Arc<dyn CodeTruth>>,
    /// Extraction tier for checkpoints
    pub tier: CurationTier,
    /// Redact secrets during normalization
    pub sanitize: bool,
    /// Checkpoint tunables; defaults come from the environment
    pub checkpoint: Option<CheckpointConfig>,
}

/// Aggregate statistics over one engine.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub events: i64,
    pub sessions: i64,
    pub blobs: i64,
    pub memories_active: i64,
    pub memories_stale: i64,
    pub memories_superseded: i64,
    pub memories_retired: i64,
    pub conflicts_pending: i64,
}

/// One project's memory engine.
pub struct Engine {
    db: Arc<Database>,
    events: Arc<EventLog>,
    blobs: Arc<BlobStore>,
    memories: Arc<MemoryStore>,
    sessions: Arc<SessionStore>,
    outcomes: Arc<OutcomeStore>,
    tokens: Arc<TokenIndex>,
    conflicts: Arc<ConflictQueue>,
    ingestor: Arc<Ingestor>,
    retriever: Arc<Retriever>,
    staleness: Option<StalenessChecker>,
}

impl Engine {
    /// Open (or create) the engine for the resolved project database.
    pub fn open(options: EngineOptions) -> Result<Self> {
        let db_path = match &options.db_path {
            Some(path) => path.clone(),
            None => resolve_db_path(options.project_root.as_deref())?.db_path,
        };
        let db = Arc::new(Database::open(&db_path)?);

        let events = Arc::new(EventLog::new(db.clone()));
        let blobs = Arc::new(BlobStore::new(db.clone()));
        let vectors = Arc::new(VectorStore::new(db.clone(), options.embedder.clone())?);
        let memories = Arc::new(MemoryStore::new(db.clone(), vectors.clone()));
        let sessions = Arc::new(SessionStore::new(db.clone()));
        let outcomes = Arc::new(OutcomeStore::new(db.clone()));
        let tokens = Arc::new(TokenIndex::new(db.clone()));
        let fts = Arc::new(FtsIndex::new(db.clone()));
        let conflicts = Arc::new(ConflictQueue::new(db.clone()));

        let checkpoint = Arc::new(CheckpointEngine::new(
            options
                .checkpoint
                .clone()
                .unwrap_or_else(CheckpointConfig::from_env),
            options.tier,
            memories.clone(),
            fts.clone(),
            sessions.clone(),
            conflicts.clone(),
            options.model.clone().map(LlmCurator::new),
        ));

        let ingestor = Arc::new(Ingestor::new(
            events.clone(),
            vectors.clone(),
            sessions.clone(),
            checkpoint,
            NormalizerConfig {
                sanitize: options.sanitize,
            },
        ));

        let retriever = Arc::new(Retriever::new(
            memories.clone(),
            sessions.clone(),
            fts,
            vectors,
        ));

        let staleness = options
            .truth
            .map(|truth| StalenessChecker::new(truth, memories.clone()));

        Ok(Self {
            db,
            events,
            blobs,
            memories,
            sessions,
            outcomes,
            tokens,
            conflicts,
            ingestor,
            retriever,
            staleness,
        })
    }

    /// The write-side facade.
    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// The read-side facade.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// The event log.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The memory object store.
    pub fn memories(&self) -> &MemoryStore {
        &self.memories
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The outcome store.
    pub fn outcomes(&self) -> &OutcomeStore {
        &self.outcomes
    }

    /// The exact-token index.
    pub fn tokens(&self) -> &TokenIndex {
        &self.tokens
    }

    /// The conflict review queue.
    pub fn conflicts(&self) -> &ConflictQueue {
        &self.conflicts
    }

    /// The staleness checker, when a code-truth bridge was injected.
    pub fn staleness(&self) -> Option<&StalenessChecker> {
        self.staleness.as_ref()
    }

    /// Path of the open database.
    pub fn db_path(&self) -> &std::path::Path {
        self.db.path()
    }

    /// Sweep blobs no event references anymore.
    pub fn clean_orphaned_blobs(&self) -> Result<usize> {
        self.blobs.clean_orphaned()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> Result<EngineStats> {
        let mut stats = EngineStats {
            events: self.events.count()?,
            sessions: self.sessions.count()?,
            blobs: self.blobs.count()?,
            conflicts_pending: self.conflicts.pending_count()?,
            ..Default::default()
        };
        for (status, n) in self.memories.count_by_status()? {
            match status {
                MemoryStatus::Active => stats.memories_active = n,
                MemoryStatus::Stale => stats.memories_stale = n,
                MemoryStatus::Superseded => stats.memories_superseded = n,
                MemoryStatus::Retired => stats.memories_retired = n,
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryInput, ObjectType};

    fn open_temp() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(EngineOptions {
            db_path: Some(dir.path().join("alexandria.db")),
            ..Default::default()
        })
        .unwrap();
        (dir, engine)
    }

    #[test]
    fn test_open_without_capabilities_degrades() {
        let (_dir, engine) = open_temp();
        // No embedder: ingest still works, vector legs are empty
        engine
            .ingestor()
            .ingest_turn("s1", "plain event with no embedder configured")
            .unwrap();
        assert!(engine.staleness().is_none());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.events, 1);
        assert_eq!(stats.sessions, 1);
    }

    #[test]
    fn test_two_engines_are_independent() {
        let (_dir_a, a) = open_temp();
        let (_dir_b, b) = open_temp();
        a.memories()
            .create(MemoryInput::new(ObjectType::Decision, "only in engine a"))
            .unwrap();
        assert_eq!(a.stats().unwrap().memories_active, 1);
        assert_eq!(b.stats().unwrap().memories_active, 0);
    }
}
