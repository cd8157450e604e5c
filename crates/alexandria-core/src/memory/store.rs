//! Memory Object Store
//!
//! CRUD plus the lifecycle state machine. Row, token index and denormalized
//! code refs commit in one transaction; the FTS mirror follows via triggers;
//! vector indexing happens after commit and is allowed to fail.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

use crate::content::{
    jaccard, new_id, normalized_prefix, truncate_chars, MEMORY_CONTENT_LIMIT,
};
use crate::error::{EngineError, Result};
use crate::index::{TokenIndex, VectorStore};
use crate::memory::{
    derive_confidence_tier, CodeRef, Confidence, ConfidenceTier, MemoryInput, MemoryObject,
    MemoryStatus, ObjectType, ReviewStatus, Scope, ScopeType,
};
use crate::storage::{parse_timestamp, parse_timestamp_opt, Database};

/// Jaccard threshold above which a candidate merges into an existing memory.
pub const MERGE_JACCARD_THRESHOLD: f64 = 0.8;

/// Filter for [`MemoryStore::list`].
#[derive(Debug, Clone)]
pub struct MemoryFilter {
    pub statuses: Vec<MemoryStatus>,
    pub object_types: Option<Vec<ObjectType>>,
    pub scope_type: Option<ScopeType>,
    pub review_status: Option<ReviewStatus>,
    pub limit: usize,
}

impl Default for MemoryFilter {
    fn default() -> Self {
        Self {
            statuses: vec![MemoryStatus::Active],
            object_types: None,
            scope_type: None,
            review_status: None,
            limit: 100,
        }
    }
}

/// Partial update for [`MemoryStore::update`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub confidence: Option<Confidence>,
    pub scope: Option<Scope>,
    pub evidence_event_ids: Option<Vec<String>>,
    pub evidence_excerpt: Option<String>,
    pub code_refs: Option<Vec<CodeRef>>,
    /// Stamp `last_verified_at = now` along with the patch
    pub refresh_verified: bool,
}

/// Durable store for memory objects.
pub struct MemoryStore {
    db: Arc<Database>,
    vectors: Arc<VectorStore>,
}

/// Which transitions the lifecycle state machine allows.
fn check_transition(from: MemoryStatus, to: MemoryStatus) -> Result<()> {
    use MemoryStatus::*;
    let legal = matches!(
        (from, to),
        (Active, Stale)
            | (Active, Superseded)
            | (Stale, Superseded)
            | (Stale, Active)
            | (_, Retired)
    ) || from == to;
    if legal {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition(format!(
            "{} -> {}",
            from.as_str(),
            to.as_str()
        )))
    }
}

impl MemoryStore {
    pub fn new(db: Arc<Database>, vectors: Arc<VectorStore>) -> Self {
        Self { db, vectors }
    }

    /// Create a memory. Content is normalized and capped at 500 chars; the
    /// auto-approve policy decides the initial review status.
    pub fn create(&self, input: MemoryInput) -> Result<MemoryObject> {
        let content = truncate_chars(input.content.trim(), MEMORY_CONTENT_LIMIT);
        if content.is_empty() {
            return Err(EngineError::validation("memory content must not be empty"));
        }
        let object_type = input
            .object_type
            .ok_or_else(|| EngineError::validation("memory object type is required"))?;

        let id = new_id();
        let now = Utc::now();
        let approved = input.auto_approve();
        let review_status = if approved {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        };

        {
            let mut conn = self.db.write()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO memory_objects (
                    id, content, object_type, scope_type, scope_path, status,
                    superseded_by, confidence, evidence_event_ids, evidence_excerpt,
                    review_status, reviewed_at, code_refs, last_verified_at,
                    access_count, last_accessed, strength, outcome_score,
                    created_at, updated_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, 'active',
                    NULL, ?6, ?7, ?8,
                    ?9, ?10, ?11, NULL,
                    0, NULL, 1.0, 0.5,
                    ?12, ?12
                )",
                params![
                    id,
                    content,
                    object_type.as_str(),
                    input.scope.scope_type.as_str(),
                    input.scope.path,
                    input.confidence.as_str(),
                    serde_json::to_string(&input.evidence_event_ids)?,
                    input.evidence_excerpt,
                    review_status.as_str(),
                    approved.then(|| now.to_rfc3339()),
                    serde_json::to_string(&input.code_refs)?,
                    now.to_rfc3339(),
                ],
            )?;
            Self::write_code_refs(&tx, &id, &input.code_refs)?;
            TokenIndex::reindex_with(&tx, &id, &content)?;
            tx.commit()?;
        }

        // Vector indexing after commit; failure degrades, never aborts
        if let Err(e) = self.vectors.index_object(&id, &content) {
            tracing::debug!("vector index failed for memory {}: {}", id, e);
        }

        self.get(&id)?
            .ok_or_else(|| EngineError::not_found(format!("memory {}", id)))
    }

    /// Get a memory by ID with its confidence tier derived fresh.
    pub fn get(&self, id: &str) -> Result<Option<MemoryObject>> {
        let reader = self.db.read()?;
        let memory = reader
            .query_row(
                "SELECT * FROM memory_objects WHERE id = ?1",
                params![id],
                Self::row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Get a memory or fail with NotFound.
    pub fn require(&self, id: &str) -> Result<MemoryObject> {
        self.get(id)?
            .ok_or_else(|| EngineError::not_found(format!("memory {}", id)))
    }

    /// Fetch several memories by id, skipping unknowns.
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<MemoryObject>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(m) = self.get(id)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    /// List memories matching a filter, newest first.
    pub fn list(&self, filter: &MemoryFilter) -> Result<Vec<MemoryObject>> {
        let mut sql = String::from("SELECT * FROM memory_objects WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let marks = vec!["?"; filter.statuses.len()].join(",");
            sql.push_str(&format!(" AND status IN ({marks})"));
            for s in &filter.statuses {
                args.push(Box::new(s.as_str().to_string()));
            }
        }
        if let Some(types) = &filter.object_types {
            let marks = vec!["?"; types.len()].join(",");
            sql.push_str(&format!(" AND object_type IN ({marks})"));
            for t in types {
                args.push(Box::new(t.as_str().to_string()));
            }
        }
        if let Some(scope) = filter.scope_type {
            sql.push_str(" AND scope_type = ?");
            args.push(Box::new(scope.as_str().to_string()));
        }
        if let Some(review) = filter.review_status {
            sql.push_str(" AND review_status = ?");
            args.push(Box::new(review.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        args.push(Box::new(filter.limit as i64));

        let reader = self.db.read()?;
        let mut stmt = reader.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let memories = stmt
            .query_map(params_ref.as_slice(), Self::row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(memories)
    }

    /// Patch a memory. Content changes re-index tokens transactionally and
    /// re-embed after commit.
    pub fn update(&self, id: &str, patch: MemoryPatch) -> Result<MemoryObject> {
        let existing = self.require(id)?;
        let now = Utc::now();

        let content = match &patch.content {
            Some(c) => {
                let c = truncate_chars(c.trim(), MEMORY_CONTENT_LIMIT);
                if c.is_empty() {
                    return Err(EngineError::validation("memory content must not be empty"));
                }
                c
            }
            None => existing.content.clone(),
        };
        let content_changed = content != existing.content;
        let confidence = patch.confidence.unwrap_or(existing.confidence);
        let scope = patch.scope.clone().unwrap_or_else(|| existing.scope.clone());
        let evidence = patch
            .evidence_event_ids
            .clone()
            .unwrap_or_else(|| existing.evidence_event_ids.clone());
        let excerpt = patch
            .evidence_excerpt
            .clone()
            .or_else(|| existing.evidence_excerpt.clone());
        let code_refs = patch
            .code_refs
            .clone()
            .unwrap_or_else(|| existing.code_refs.clone());
        let refs_changed = patch.code_refs.is_some();
        let last_verified_at = if patch.refresh_verified {
            Some(now)
        } else {
            existing.last_verified_at
        };

        {
            let mut conn = self.db.write()?;
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE memory_objects SET
                    content = ?1, confidence = ?2, scope_type = ?3, scope_path = ?4,
                    evidence_event_ids = ?5, evidence_excerpt = ?6, code_refs = ?7,
                    last_verified_at = ?8, updated_at = ?9
                 WHERE id = ?10",
                params![
                    content,
                    confidence.as_str(),
                    scope.scope_type.as_str(),
                    scope.path,
                    serde_json::to_string(&evidence)?,
                    excerpt,
                    serde_json::to_string(&code_refs)?,
                    last_verified_at.map(|t| t.to_rfc3339()),
                    now.to_rfc3339(),
                    id,
                ],
            )?;
            if content_changed {
                TokenIndex::reindex_with(&tx, id, &content)?;
            }
            if refs_changed {
                Self::write_code_refs(&tx, id, &code_refs)?;
            }
            tx.commit()?;
        }

        if content_changed {
            if let Err(e) = self.vectors.index_object(id, &content) {
                tracing::debug!("vector re-index failed for memory {}: {}", id, e);
            }
        }

        self.require(id)
    }

    /// Approve a pending memory.
    pub fn approve(&self, id: &str) -> Result<MemoryObject> {
        let m = self.require(id)?;
        let now = Utc::now();
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE memory_objects SET review_status = 'approved', reviewed_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![now.to_rfc3339(), m.id],
        )?;
        drop(writer);
        self.require(id)
    }

    /// Reject a memory; rejection retires it.
    pub fn reject(&self, id: &str) -> Result<MemoryObject> {
        let m = self.require(id)?;
        check_transition(m.status, MemoryStatus::Retired)?;
        let now = Utc::now();
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE memory_objects SET review_status = 'rejected', reviewed_at = ?1,
                    status = 'retired', updated_at = ?1
             WHERE id = ?2",
            params![now.to_rfc3339(), m.id],
        )?;
        drop(writer);
        self.require(id)
    }

    /// Explicitly retire a memory.
    pub fn retire(&self, id: &str) -> Result<MemoryObject> {
        let m = self.require(id)?;
        check_transition(m.status, MemoryStatus::Retired)?;
        self.set_status(id, MemoryStatus::Retired, None)?;
        self.require(id)
    }

    /// Mark a memory stale (staleness checker).
    pub fn mark_stale(&self, id: &str) -> Result<MemoryObject> {
        let m = self.require(id)?;
        check_transition(m.status, MemoryStatus::Stale)?;
        self.set_status(id, MemoryStatus::Stale, None)?;
        self.require(id)
    }

    /// Verify a memory: a stale one returns to active, and the verification
    /// timestamp is refreshed either way.
    pub fn verify(&self, id: &str) -> Result<MemoryObject> {
        let m = self.require(id)?;
        check_transition(m.status, MemoryStatus::Active)?;
        let now = Utc::now();
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE memory_objects SET status = 'active', last_verified_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![now.to_rfc3339(), m.id],
        )?;
        drop(writer);
        self.require(id)
    }

    /// Supersede `old_id` with the active memory `new_id`. Non-destructive:
    /// the old row stays for audit with `superseded_by` set. Edges already
    /// terminating on `old_id` are rewritten to `new_id`, so every
    /// superseded row keeps pointing at an active memory even across chains
    /// (A superseded by B, B later superseded by C leaves both at C).
    pub fn supersede(&self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Err(EngineError::validation("a memory cannot supersede itself"));
        }
        let old = self.require(old_id)?;
        let new = self.require(new_id)?;
        if new.status != MemoryStatus::Active {
            return Err(EngineError::InvalidTransition(format!(
                "superseding memory {} must be active, is {}",
                new.id,
                new.status.as_str()
            )));
        }
        check_transition(old.status, MemoryStatus::Superseded)?;
        self.set_status(old_id, MemoryStatus::Superseded, Some(new_id))?;
        self.repoint_superseded(old_id, new_id)?;
        Ok(())
    }

    /// Rewrite every `superseded_by = old_id` edge to `new_id`. The just
    /// superseded row is untouched: its own edge already points at `new_id`.
    fn repoint_superseded(&self, old_id: &str, new_id: &str) -> Result<()> {
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE memory_objects SET superseded_by = ?1, updated_at = ?2
             WHERE superseded_by = ?3",
            params![new_id, Utc::now().to_rfc3339(), old_id],
        )?;
        Ok(())
    }

    /// Derived inverse of `superseded_by`: ids this memory replaced.
    pub fn supersedes_of(&self, id: &str) -> Result<Vec<String>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT id FROM memory_objects WHERE superseded_by = ?1 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn set_status(
        &self,
        id: &str,
        status: MemoryStatus,
        superseded_by: Option<&str>,
    ) -> Result<()> {
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE memory_objects SET status = ?1, superseded_by = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                superseded_by,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    /// Refresh the verification stamp and ref anchors after a staleness pass.
    pub fn stamp_verified(&self, id: &str, refs: &[CodeRef]) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.db.write()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE memory_objects SET code_refs = ?1, last_verified_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![serde_json::to_string(refs)?, now.to_rfc3339(), id],
        )?;
        Self::write_code_refs(&tx, id, refs)?;
        tx.commit()?;
        Ok(())
    }

    /// Bump access heat for the given memories; errors are ignored by
    /// callers on the read path.
    pub fn record_access(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let writer = self.db.write()?;
        for id in ids {
            writer.execute(
                "UPDATE memory_objects SET access_count = access_count + 1, last_accessed = ?1
                 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(())
    }

    /// Find an existing active memory the candidate should merge into:
    /// same type, and identical normalized prefix or token Jaccard >= 0.8.
    pub fn find_similar(
        &self,
        object_type: ObjectType,
        content: &str,
    ) -> Result<Option<MemoryObject>> {
        let prefix = normalized_prefix(content);
        let candidates = self.list(&MemoryFilter {
            statuses: vec![MemoryStatus::Active],
            object_types: Some(vec![object_type]),
            limit: 500,
            ..Default::default()
        })?;
        Ok(candidates.into_iter().find(|m| {
            normalized_prefix(&m.content) == prefix
                || jaccard(&m.content, content) >= MERGE_JACCARD_THRESHOLD
        }))
    }

    /// Merge candidate evidence into an existing memory; no new row.
    pub fn merge_evidence(
        &self,
        id: &str,
        evidence_event_ids: &[String],
        confidence: Confidence,
    ) -> Result<MemoryObject> {
        let existing = self.require(id)?;
        let mut evidence = existing.evidence_event_ids.clone();
        for e in evidence_event_ids {
            if !evidence.contains(e) {
                evidence.push(e.clone());
            }
        }
        let confidence = if confidence.rank() > existing.confidence.rank() {
            confidence
        } else {
            existing.confidence
        };
        self.update(
            id,
            MemoryPatch {
                evidence_event_ids: Some(evidence),
                confidence: Some(confidence),
                ..Default::default()
            },
        )
    }

    /// Count memories per status, for stats.
    pub fn count_by_status(&self) -> Result<Vec<(MemoryStatus, i64)>> {
        let reader = self.db.read()?;
        let mut stmt = reader
            .prepare("SELECT status, COUNT(*) FROM memory_objects GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .map(|(s, n)| (MemoryStatus::parse_name(&s), n))
            .collect();
        Ok(rows)
    }

    fn write_code_refs(conn: &Connection, memory_id: &str, refs: &[CodeRef]) -> Result<()> {
        conn.execute(
            "DELETE FROM memory_code_refs WHERE memory_id = ?1",
            params![memory_id],
        )?;
        for r in refs {
            conn.execute(
                "INSERT INTO memory_code_refs (
                    id, memory_id, path, ref_type, symbol, line_start, line_end,
                    verified_at_commit, content_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new_id(),
                    memory_id,
                    r.path,
                    r.ref_type.as_str(),
                    r.symbol,
                    r.line_start,
                    r.line_end,
                    r.verified_at_commit,
                    r.content_hash,
                ],
            )?;
        }
        Ok(())
    }

    fn row_to_memory(row: &Row) -> rusqlite::Result<MemoryObject> {
        let evidence_json: String = row.get("evidence_event_ids")?;
        let refs_json: String = row.get("code_refs")?;
        let object_type: String = row.get("object_type")?;
        let status: String = row.get("status")?;
        let confidence: String = row.get("confidence")?;
        let review: String = row.get("review_status")?;
        let scope_type: String = row.get("scope_type")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        let mut memory = MemoryObject {
            id: row.get("id")?,
            content: row.get("content")?,
            object_type: ObjectType::try_parse(&object_type).unwrap_or(ObjectType::Decision),
            scope: Scope {
                scope_type: ScopeType::parse_name(&scope_type),
                path: row.get("scope_path")?,
            },
            status: MemoryStatus::parse_name(&status),
            superseded_by: row.get("superseded_by")?,
            confidence: Confidence::parse_name(&confidence),
            confidence_tier: ConfidenceTier::Hypothesis,
            evidence_event_ids: serde_json::from_str(&evidence_json).unwrap_or_default(),
            evidence_excerpt: row.get("evidence_excerpt")?,
            review_status: ReviewStatus::parse_name(&review),
            reviewed_at: parse_timestamp_opt(row.get("reviewed_at")?),
            code_refs: serde_json::from_str(&refs_json).unwrap_or_default(),
            last_verified_at: parse_timestamp_opt(row.get("last_verified_at")?),
            access_count: row.get("access_count")?,
            last_accessed: parse_timestamp_opt(row.get("last_accessed")?),
            strength: row.get("strength")?,
            outcome_score: row.get("outcome_score")?,
            created_at: parse_timestamp(&created_at, "created_at")?,
            updated_at: parse_timestamp(&updated_at, "updated_at")?,
        };
        memory.confidence_tier = derive_confidence_tier(&memory);
        Ok(memory)
    }
}

// ============================================================================
// TESTS
// ============================================================================
