//! Database Migrations
//!
//! Forward-only, idempotent schema migrations tracked in `schema_version`.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: sessions, events, blobs, memory objects, outcomes, token index, FTS mirrors",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Embedding mirrors for events and memory objects",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Conflict review queue and retrieval heat indexes",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    working_directory TEXT,
    working_file TEXT,
    working_task TEXT,
    summary TEXT,
    events_count INTEGER NOT NULL DEFAULT 0,
    objects_created INTEGER NOT NULL DEFAULT 0,
    objects_accessed INTEGER NOT NULL DEFAULT 0,
    last_checkpoint_at TEXT,
    events_since_checkpoint INTEGER NOT NULL DEFAULT 0,
    injected_memory_ids TEXT NOT NULL DEFAULT '[]',
    last_disclosure_at TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    disclosure_level TEXT NOT NULL DEFAULT 'minimal',
    last_topic TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

-- Append-only event log. `seq` is a stable per-database insertion counter
-- used to break timestamp ties across restarts (rowid survives neither
-- VACUUM nor backup/restore).
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    content TEXT,
    blob_id TEXT,
    tool_name TEXT,
    file_path TEXT,
    exit_code INTEGER,
    content_hash TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_hash ON events(content_hash);
CREATE INDEX IF NOT EXISTS idx_events_seq ON events(seq);

-- Opaque payloads for oversized events; reference-counted by events.blob_id
CREATE TABLE IF NOT EXISTS blobs (
    id TEXT PRIMARY KEY,
    content BLOB NOT NULL,
    size INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_objects (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    object_type TEXT NOT NULL,
    scope_type TEXT NOT NULL DEFAULT 'project',
    scope_path TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    superseded_by TEXT,
    confidence TEXT NOT NULL DEFAULT 'medium',
    evidence_event_ids TEXT NOT NULL DEFAULT '[]',
    evidence_excerpt TEXT,
    review_status TEXT NOT NULL DEFAULT 'pending',
    reviewed_at TEXT,
    code_refs TEXT NOT NULL DEFAULT '[]',
    last_verified_at TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    strength REAL NOT NULL DEFAULT 1.0,
    outcome_score REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_status ON memory_objects(status);
CREATE INDEX IF NOT EXISTS idx_memory_type ON memory_objects(object_type);
CREATE INDEX IF NOT EXISTS idx_memory_scope ON memory_objects(scope_type, scope_path);
CREATE INDEX IF NOT EXISTS idx_memory_review ON memory_objects(review_status);

-- Denormalized code refs for staleness queries; the JSON column on
-- memory_objects stays authoritative
CREATE TABLE IF NOT EXISTS memory_code_refs (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    path TEXT NOT NULL,
    ref_type TEXT NOT NULL,
    symbol TEXT,
    line_start INTEGER,
    line_end INTEGER,
    verified_at_commit TEXT,
    content_hash TEXT,
    FOREIGN KEY (memory_id) REFERENCES memory_objects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_code_refs_memory ON memory_code_refs(memory_id);
CREATE INDEX IF NOT EXISTS idx_code_refs_path ON memory_code_refs(path);

-- Exact-token index over memory content
CREATE TABLE IF NOT EXISTS object_tokens (
    object_id TEXT NOT NULL,
    token TEXT NOT NULL,
    token_type TEXT NOT NULL,
    PRIMARY KEY (object_id, token),
    FOREIGN KEY (object_id) REFERENCES memory_objects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_object_tokens_token ON object_tokens(token);

CREATE TABLE IF NOT EXISTS memory_outcomes (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    outcome TEXT NOT NULL,
    context TEXT,
    FOREIGN KEY (memory_id) REFERENCES memory_objects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_outcomes_memory ON memory_outcomes(memory_id);

-- FTS5 mirrors with porter stemming, kept in sync by triggers
CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
    id, content,
    content='events',
    content_rowid='rowid',
    tokenize='porter ascii'
);

CREATE TRIGGER IF NOT EXISTS events_ai AFTER INSERT ON events BEGIN
    INSERT INTO events_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, COALESCE(NEW.content, ''));
END;

CREATE VIRTUAL TABLE IF NOT EXISTS memory_objects_fts USING fts5(
    id, content,
    content='memory_objects',
    content_rowid='rowid',
    tokenize='porter ascii'
);

CREATE TRIGGER IF NOT EXISTS memory_ai AFTER INSERT ON memory_objects BEGIN
    INSERT INTO memory_objects_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS memory_ad AFTER DELETE ON memory_objects BEGIN
    INSERT INTO memory_objects_fts(memory_objects_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS memory_au AFTER UPDATE ON memory_objects BEGIN
    INSERT INTO memory_objects_fts(memory_objects_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
    INSERT INTO memory_objects_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Embedding mirrors (binary little-endian f32 blobs). These hydrate the
/// in-memory nearest-neighbor index at startup.
const MIGRATION_V2_UP: &str = r#"
-- No foreign keys here: mirrors are advisory and swept with their owners
CREATE TABLE IF NOT EXISTS event_embeddings (
    event_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL DEFAULT 384,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS object_embeddings (
    object_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL DEFAULT 384,
    created_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, datetime('now'));
"#;

/// V3: Conflict review queue + heat indexes for context assembly
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_conflicts (
    id TEXT PRIMARY KEY,
    candidate TEXT NOT NULL,
    kind TEXT NOT NULL,
    severity TEXT NOT NULL,
    existing_ids TEXT NOT NULL DEFAULT '[]',
    suggested TEXT NOT NULL,
    detail TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_conflicts_status ON memory_conflicts(status);
CREATE INDEX IF NOT EXISTS idx_memory_access ON memory_objects(access_count);
CREATE INDEX IF NOT EXISTS idx_memory_verified ON memory_objects(last_verified_at);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (3, datetime('now'));
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
