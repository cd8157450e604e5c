//! Conflict Detection
//!
//! Compares a curation candidate against related existing memories and
//! classifies duplicates, contradictions, supersessions and ambiguity, each
//! with a suggested resolution. Conflicts are data, not errors: high-severity
//! contradictions are queued for human review in `memory_conflicts`.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::content::{jaccard, new_id};
use crate::curate::Candidate;
use crate::error::Result;
use crate::memory::{MemoryObject, ObjectType};
use crate::storage::Database;

/// Jaccard threshold for duplicates.
pub const DUPLICATE_JACCARD: f64 = 0.85;

/// Jaccard threshold for supersession between compatible types.
pub const SUPERSESSION_JACCARD: f64 = 0.5;

/// Similarity above which a merge keeps the candidate content verbatim.
pub const MERGE_VERBATIM_SIMILARITY: f64 = 0.7;

/// Conflict classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Duplicate,
    Contradiction,
    Supersession,
    Ambiguity,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Duplicate => "duplicate",
            ConflictKind::Contradiction => "contradiction",
            ConflictKind::Supersession => "supersession",
            ConflictKind::Ambiguity => "ambiguity",
        }
    }
}

/// Conflict severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Suggested (and applied) resolution actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepExisting,
    Replace,
    Merge,
    KeepBoth,
    RejectBoth,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepExisting => "keep_existing",
            Resolution::Replace => "replace",
            Resolution::Merge => "merge",
            Resolution::KeepBoth => "keep_both",
            Resolution::RejectBoth => "reject_both",
        }
    }
}

/// A detected conflict between a candidate and existing memories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub existing_ids: Vec<String>,
    pub suggested: Resolution,
    pub detail: String,
}

/// Word pairs whose opposite-polarity appearance marks a contradiction.
pub const POLARITY_PAIRS: &[(&str, &str)] = &[
    ("always", "never"),
    ("must", "must not"),
    ("use", "don't use"),
    ("use", "do not use"),
    ("enable", "disable"),
    ("true", "false"),
    ("yes", "no"),
];

/// Type pairs that may supersede one another.
const COMPATIBLE_TYPES: &[(ObjectType, ObjectType)] = &[
    (ObjectType::Decision, ObjectType::Convention),
    (ObjectType::Decision, ObjectType::Preference),
    (ObjectType::Convention, ObjectType::Preference),
    (ObjectType::Constraint, ObjectType::Decision),
    (ObjectType::KnownFix, ObjectType::FailedAttempt),
];

fn types_compatible(a: ObjectType, b: ObjectType) -> bool {
    a == b
        || COMPATIBLE_TYPES
            .iter()
            .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}

fn contains_term(content: &str, term: &str) -> bool {
    let lower = content.to_lowercase();
    if term.contains(' ') {
        return lower.contains(term);
    }
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|w| w == term)
}

/// Whether one side carries the positive term and the other the negative.
/// Negative phrases are checked first so "must not" never reads as "must".
fn opposite_polarity(a: &str, b: &str) -> bool {
    for &(pos, neg) in POLARITY_PAIRS {
        let a_neg = contains_term(a, neg);
        let b_neg = contains_term(b, neg);
        let a_pos = contains_term(a, pos) && !a_neg;
        let b_pos = contains_term(b, pos) && !b_neg;
        if (a_pos && b_neg) || (b_pos && a_neg) {
            return true;
        }
    }
    false
}

/// Detect conflicts between a candidate and its FTS-related memories.
pub fn detect(candidate: &Candidate, related: &[MemoryObject]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for existing in related {
        let similarity = jaccard(&candidate.content, &existing.content);

        if existing.object_type == candidate.object_type && similarity >= DUPLICATE_JACCARD {
            let candidate_wins = candidate.evidence_event_ids.len()
                > existing.evidence_event_ids.len()
                || candidate.confidence.rank() > existing.confidence.rank();
            conflicts.push(Conflict {
                kind: ConflictKind::Duplicate,
                severity: Severity::High,
                existing_ids: vec![existing.id.clone()],
                suggested: if candidate_wins {
                    Resolution::Replace
                } else {
                    Resolution::KeepExisting
                },
                detail: format!("token jaccard {similarity:.2} with same type"),
            });
            continue;
        }

        if opposite_polarity(&candidate.content, &existing.content)
            && similarity >= SUPERSESSION_JACCARD / 2.0
        {
            conflicts.push(Conflict {
                kind: ConflictKind::Contradiction,
                severity: Severity::High,
                existing_ids: vec![existing.id.clone()],
                suggested: Resolution::KeepExisting,
                detail: "opposite polarity terms in overlapping content".to_string(),
            });
            continue;
        }

        if similarity > SUPERSESSION_JACCARD
            && types_compatible(candidate.object_type, existing.object_type)
        {
            conflicts.push(Conflict {
                kind: ConflictKind::Supersession,
                severity: Severity::Medium,
                existing_ids: vec![existing.id.clone()],
                suggested: Resolution::Replace,
                detail: format!(
                    "jaccard {similarity:.2} across compatible types {} / {}",
                    candidate.object_type, existing.object_type
                ),
            });
        }
    }

    // Ambiguity: the related set contradicts itself
    for i in 0..related.len() {
        for j in (i + 1)..related.len() {
            if opposite_polarity(&related[i].content, &related[j].content) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Ambiguity,
                    severity: Severity::Medium,
                    existing_ids: vec![related[i].id.clone(), related[j].id.clone()],
                    suggested: Resolution::KeepBoth,
                    detail: "related memories contradict each other".to_string(),
                });
            }
        }
    }

    conflicts
}

// ============================================================================
// REVIEW QUEUE
// ============================================================================

/// A queued conflict awaiting human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedConflict {
    pub id: String,
    pub candidate: Candidate,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub existing_ids: Vec<String>,
    pub suggested: Resolution,
    pub detail: Option<String>,
}

/// Persistent queue of unresolved conflicts.
pub struct ConflictQueue {
    db: Arc<Database>,
}

impl ConflictQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Queue a candidate with its blocking conflict.
    pub fn enqueue(&self, candidate: &Candidate, conflict: &Conflict) -> Result<String> {
        let id = new_id();
        let writer = self.db.write()?;
        writer.execute(
            "INSERT INTO memory_conflicts (
                id, candidate, kind, severity, existing_ids, suggested, detail,
                status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
            params![
                id,
                serde_json::to_string(candidate)?,
                conflict.kind.as_str(),
                conflict.severity.as_str(),
                serde_json::to_string(&conflict.existing_ids)?,
                conflict.suggested.as_str(),
                conflict.detail,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Pending conflicts, oldest first.
    pub fn pending(&self) -> Result<Vec<QueuedConflict>> {
        let reader = self.db.read()?;
        let mut stmt = reader.prepare(
            "SELECT id, candidate, kind, severity, existing_ids, suggested, detail
             FROM memory_conflicts WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, cand, kind, severity, existing, suggested, detail)| {
                let candidate: Candidate = serde_json::from_str(&cand).ok()?;
                Some(QueuedConflict {
                    id,
                    candidate,
                    kind: match kind.as_str() {
                        "duplicate" => ConflictKind::Duplicate,
                        "contradiction" => ConflictKind::Contradiction,
                        "supersession" => ConflictKind::Supersession,
                        _ => ConflictKind::Ambiguity,
                    },
                    severity: match severity.as_str() {
                        "high" => Severity::High,
                        "medium" => Severity::Medium,
                        _ => Severity::Low,
                    },
                    existing_ids: serde_json::from_str(&existing).unwrap_or_default(),
                    suggested: match suggested.as_str() {
                        "replace" => Resolution::Replace,
                        "merge" => Resolution::Merge,
                        "keep_both" => Resolution::KeepBoth,
                        "reject_both" => Resolution::RejectBoth,
                        _ => Resolution::KeepExisting,
                    },
                    detail,
                })
            })
            .collect();
        Ok(rows)
    }

    /// Mark a queued conflict resolved.
    pub fn mark_resolved(&self, id: &str) -> Result<()> {
        let writer = self.db.write()?;
        writer.execute(
            "UPDATE memory_conflicts SET status = 'resolved', resolved_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Number of pending conflicts.
    pub fn pending_count(&self) -> Result<i64> {
        let reader = self.db.read()?;
        let n = reader.query_row(
            "SELECT COUNT(*) FROM memory_conflicts WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

// ============================================================================
// TESTS
// ============================================================================
