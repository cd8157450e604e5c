//! Engine Error Types
//!
//! One sum type for the whole core. External-I/O failures (embedding, LLM,
//! code truth) are represented but almost never propagated out of an ingest
//! cycle; they degrade to logged warnings instead.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Malformed input; no state change happened
    #[error("validation failed: {0}")]
    Validation(String),
    /// Unknown memory/session/event/blob id
    #[error("not found: {0}")]
    NotFound(String),
    /// Illegal lifecycle transition; fatal to the caller
    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(String),
    /// A mutex guarding a connection or index was poisoned
    #[error("lock poisoned: {0}")]
    Lock(&'static str),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
    /// An injected capability (embedder, language model, code truth) failed
    #[error("external subsystem failed: {0}")]
    External(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Shorthand for validation failures
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Shorthand for missing entities
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}
