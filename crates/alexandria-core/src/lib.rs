//! # Alexandria Core
//!
//! Per-project memory engine for long-running coding agents:
//!
//! - **Event log**: append-only, content-addressed, blob-offloaded record of
//!   session events (turns, tool outputs, diffs, errors, test summaries)
//! - **Checkpoint curator**: episodic boundary detection plus tiered
//!   extraction (deterministic rules, optional LLM) into memory candidates
//! - **Memory store**: durable objects with a lifecycle state machine
//!   (active / stale / superseded / retired), conflict detection,
//!   supersession and code-ref grounding
//! - **Retrieval**: hybrid FTS5 + vector search with confidence-tier,
//!   recency, scope and outcome reinforcement, progressive disclosure and
//!   token-budgeted context packs
//!
//! External collaborators are injected as capability traits: [`Embedder`]
//! (text → 384-d vector), [`LanguageModel`] (prompt → completion) and
//! [`CodeTruth`] (working-tree queries). All of them are optional; the
//! engine degrades rather than fails when one is missing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use alexandria_core::{Engine, EngineOptions, ContextRequest, DisclosureLevel};
//!
//! let engine = Engine::open(EngineOptions::default())?;
//!
//! // Feed it session events
//! engine.ingestor().ingest_turn("session-1", "Never commit generated files.")?;
//! engine.ingestor().trigger_checkpoint("session-1")?;
//!
//! // Get a bounded context pack back
//! let pack = engine.retriever().get_context(&ContextRequest {
//!     level: DisclosureLevel::Task,
//!     query: Some("generated files".into()),
//!     ..Default::default()
//! })?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod checkpoint;
pub mod conflict;
pub mod content;
pub mod curate;
pub mod error;
pub mod events;
pub mod index;
pub mod ingest;
pub mod memory;
pub mod normalize;
pub mod outcome;
pub mod retrieval;
pub mod session;
pub mod storage;
pub mod truth;

mod engine;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use engine::{Engine, EngineOptions, EngineStats};
pub use error::{EngineError, Result};

pub use events::{BlobStore, Event, EventLog, EventType};

pub use memory::{
    derive_confidence_tier, CodeRef, Confidence, ConfidenceTier, MemoryFilter, MemoryInput,
    MemoryObject, MemoryPatch, MemoryStatus, MemoryStore, ObjectType, RefType, ReviewStatus,
    Scope, ScopeType,
};

pub use checkpoint::{
    CheckpointConfig, CheckpointEngine, CheckpointOutcome, Trigger, TriggerKind,
};

pub use curate::{
    Candidate, CurationTier, Episode, EpisodeEvent, Extractor, LanguageModel, LlmCurator,
    LlmError, RuleCurator, ToolCall,
};

pub use conflict::{Conflict, ConflictKind, ConflictQueue, QueuedConflict, Resolution, Severity};

pub use index::{
    cosine_similarity, extract_tokens, EmbedError, Embedder, Embedding, ExtractedToken, FtsHit,
    FtsIndex, TokenIndex, TokenType, VectorStore, EMBEDDING_DIMENSIONS,
};

pub use ingest::{IngestReceipt, IngestRequest, Ingestor};

pub use normalize::{normalize, EventMeta, Normalized, NormalizerConfig, Signals};

pub use outcome::{OutcomeKind, OutcomeRecord, OutcomeStore};

pub use retrieval::{
    classify_intent, detect_escalation, ContextPack, ContextPackMetadata, ContextRequest,
    EscalationReason, EscalationSignal, MatchType, QueryIntent, RetrievalPlan, Retriever,
    ScoredMemory, SearchMode, SearchOptions, TierBreakdown,
};

pub use session::{DisclosureLevel, Session, SessionStore};

pub use storage::{resolve_db_path, Database, ProjectPaths};

pub use truth::{CodeTruth, RefState, StalenessChecker, StalenessReport};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CodeRef, Confidence, ConfidenceTier, ContextPack, ContextRequest, DisclosureLevel,
        Engine, EngineError, EngineOptions, EventType, MemoryInput, MemoryObject, MemoryStatus,
        ObjectType, Result, Scope, SearchMode, SearchOptions,
    };

    pub use crate::{CodeTruth, Embedder, LanguageModel};
}
