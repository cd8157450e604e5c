//! Memory Object Model
//!
//! Durable curated facts with a lifecycle state machine
//! (active / stale / superseded / retired), evidence provenance, code-ref
//! grounding and a deterministically derived confidence tier.

mod store;

pub use store::{MemoryFilter, MemoryPatch, MemoryStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// ENUMS
// ============================================================================

/// The seven kinds of durable memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A choice that was made, with rationale
    Decision,
    /// A user or team preference
    Preference,
    /// A naming/structure convention in the code base
    Convention,
    /// An error signature and the change that resolved it
    KnownFix,
    /// A hard rule that must not be violated
    Constraint,
    /// An approach that was tried and did not work
    FailedAttempt,
    /// A fact about the environment or toolchain
    Environment,
}

impl ObjectType {
    pub const ALL: &'static [ObjectType] = &[
        ObjectType::Decision,
        ObjectType::Preference,
        ObjectType::Convention,
        ObjectType::KnownFix,
        ObjectType::Constraint,
        ObjectType::FailedAttempt,
        ObjectType::Environment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Decision => "decision",
            ObjectType::Preference => "preference",
            ObjectType::Convention => "convention",
            ObjectType::KnownFix => "known_fix",
            ObjectType::Constraint => "constraint",
            ObjectType::FailedAttempt => "failed_attempt",
            ObjectType::Environment => "environment",
        }
    }

    /// Parse a type name; unknown names are a validation error.
    pub fn try_parse(s: &str) -> Result<Self> {
        match s {
            "decision" => Ok(ObjectType::Decision),
            "preference" => Ok(ObjectType::Preference),
            "convention" => Ok(ObjectType::Convention),
            "known_fix" => Ok(ObjectType::KnownFix),
            "constraint" => Ok(ObjectType::Constraint),
            "failed_attempt" => Ok(ObjectType::FailedAttempt),
            "environment" => Ok(ObjectType::Environment),
            other => Err(EngineError::validation(format!(
                "unknown object type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    #[default]
    Active,
    Stale,
    Superseded,
    Retired,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Stale => "stale",
            MemoryStatus::Superseded => "superseded",
            MemoryStatus::Retired => "retired",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "stale" => MemoryStatus::Stale,
            "superseded" => MemoryStatus::Superseded,
            "retired" => MemoryStatus::Retired,
            _ => MemoryStatus::Active,
        }
    }

    /// Retrieval multiplier for this status.
    pub fn score_multiplier(&self) -> f32 {
        match self {
            MemoryStatus::Active => 1.0,
            MemoryStatus::Stale => 0.6,
            MemoryStatus::Superseded | MemoryStatus::Retired => 0.0,
        }
    }
}

/// Stated confidence of a memory (input side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Certain,
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Certain => "certain",
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "certain" => Confidence::Certain,
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }

    /// Ordering rank: certain > high > medium > low.
    pub fn rank(&self) -> u8 {
        match self {
            Confidence::Certain => 3,
            Confidence::High => 2,
            Confidence::Medium => 1,
            Confidence::Low => 0,
        }
    }
}

/// Derived confidence tier (never stored as authoritative)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    /// Anchored to current code via a verified ref
    Grounded,
    /// Has evidence, refs, or explicit approval
    Observed,
    /// Pending review with nothing stronger
    Inferred,
    /// Rejected or evidence-free
    Hypothesis,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Grounded => "grounded",
            ConfidenceTier::Observed => "observed",
            ConfidenceTier::Inferred => "inferred",
            ConfidenceTier::Hypothesis => "hypothesis",
        }
    }

    /// Retrieval multiplier for this tier.
    pub fn score_multiplier(&self) -> f32 {
        match self {
            ConfidenceTier::Grounded => 2.0,
            ConfidenceTier::Observed => 1.5,
            ConfidenceTier::Inferred => 1.0,
            ConfidenceTier::Hypothesis => 0.5,
        }
    }
}

/// Review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "approved" => ReviewStatus::Approved,
            "rejected" => ReviewStatus::Rejected,
            _ => ReviewStatus::Pending,
        }
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Scope granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Global,
    #[default]
    Project,
    Module,
    File,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Global => "global",
            ScopeType::Project => "project",
            ScopeType::Module => "module",
            ScopeType::File => "file",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "global" => ScopeType::Global,
            "module" => ScopeType::Module,
            "file" => ScopeType::File,
            _ => ScopeType::Project,
        }
    }
}

/// Where a memory applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub scope_type: ScopeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Scope {
    pub fn project() -> Self {
        Self::default()
    }

    pub fn module(path: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Module,
            path: Some(path.into()),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::File,
            path: Some(path.into()),
        }
    }
}

// ============================================================================
// CODE REFERENCES
// ============================================================================

/// Kind of code reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    #[default]
    File,
    Symbol,
    LineRange,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::File => "file",
            RefType::Symbol => "symbol",
            RefType::LineRange => "line_range",
        }
    }
}

/// A reference from a memory into the code base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRef {
    pub ref_type: RefType,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl CodeRef {
    /// A bare file reference.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            ref_type: RefType::File,
            path: path.into(),
            symbol: None,
            line_start: None,
            line_end: None,
            verified_at_commit: None,
            content_hash: None,
        }
    }

    /// A symbol within a file.
    pub fn symbol(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ref_type: RefType::Symbol,
            symbol: Some(name.into()),
            ..Self::file(path)
        }
    }

    /// A line range within a file. Fails on inverted or non-positive ranges.
    pub fn line_range(path: impl Into<String>, start: i64, end: i64) -> Result<Self> {
        if start < 1 || end < start {
            return Err(EngineError::validation(format!(
                "bad line range {start}..{end}"
            )));
        }
        Ok(Self {
            ref_type: RefType::LineRange,
            line_start: Some(start),
            line_end: Some(end),
            ..Self::file(path)
        })
    }

    /// Whether this ref carries any verification anchor (commit or hash).
    pub fn is_anchored(&self) -> bool {
        self.verified_at_commit.is_some() || self.content_hash.is_some()
    }
}

// ============================================================================
// MEMORY OBJECT
// ============================================================================

/// A curated, durable fact usable as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryObject {
    pub id: String,
    /// Normalized content, at most 500 chars
    pub content: String,
    pub object_type: ObjectType,
    pub scope: Scope,
    pub status: MemoryStatus,
    /// Set iff status is superseded; points at an active memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub confidence: Confidence,
    /// Derived on every load; never authoritative in storage
    pub confidence_tier: ConfidenceTier,
    pub evidence_event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_excerpt: Option<String>,
    pub review_status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub code_refs: Vec<CodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub strength: f64,
    pub outcome_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derive the confidence tier from evidence, refs, review status and
/// verification state. Recomputed on every load and update.
pub fn derive_confidence_tier(m: &MemoryObject) -> ConfidenceTier {
    let has_verified_ref = m.code_refs.iter().any(CodeRef::is_anchored);
    if has_verified_ref && m.last_verified_at.is_some() && m.status == MemoryStatus::Active {
        return ConfidenceTier::Grounded;
    }
    if !m.code_refs.is_empty()
        || !m.evidence_event_ids.is_empty()
        || m.review_status == ReviewStatus::Approved
    {
        return ConfidenceTier::Observed;
    }
    if m.review_status == ReviewStatus::Pending {
        return ConfidenceTier::Inferred;
    }
    ConfidenceTier::Hypothesis
}

/// Input for creating a memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    pub content: String,
    pub object_type: Option<ObjectType>,
    pub scope: Scope,
    pub confidence: Confidence,
    pub evidence_event_ids: Vec<String>,
    pub evidence_excerpt: Option<String>,
    pub code_refs: Vec<CodeRef>,
}

impl MemoryInput {
    pub fn new(object_type: ObjectType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            object_type: Some(object_type),
            ..Default::default()
        }
    }

    /// Auto-approve policy: high or certain confidence backed by evidence
    /// events or code refs.
    pub fn auto_approve(&self) -> bool {
        matches!(self.confidence, Confidence::High | Confidence::Certain)
            && (!self.evidence_event_ids.is_empty() || !self.code_refs.is_empty())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base_memory() -> MemoryObject {
        let now = Utc::now();
        MemoryObject {
            id: "m1".into(),
            content: "Use tabs for indentation".into(),
            object_type: ObjectType::Preference,
            scope: Scope::project(),
            status: MemoryStatus::Active,
            superseded_by: None,
            confidence: Confidence::Medium,
            confidence_tier: ConfidenceTier::Hypothesis,
            evidence_event_ids: vec![],
            evidence_excerpt: None,
            review_status: ReviewStatus::Pending,
            reviewed_at: None,
            code_refs: vec![],
            last_verified_at: None,
            access_count: 0,
            last_accessed: None,
            strength: 1.0,
            outcome_score: 0.5,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_tier_inferred_when_pending_and_bare() {
        let m = base_memory();
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Inferred);
    }

    #[test]
    fn test_tier_observed_with_evidence_or_approval() {
        let mut m = base_memory();
        m.evidence_event_ids = vec!["e1".into()];
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Observed);

        let mut m = base_memory();
        m.review_status = ReviewStatus::Approved;
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Observed);
    }

    #[test]
    fn test_tier_grounded_requires_verified_active() {
        let mut m = base_memory();
        let mut r = CodeRef::file("src/lib.rs");
        r.verified_at_commit = Some("abc123".into());
        m.code_refs = vec![r];
        // Missing last_verified_at: only observed
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Observed);

        m.last_verified_at = Some(Utc::now());
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Grounded);

        // Stale memory can never be grounded
        m.status = MemoryStatus::Stale;
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Observed);
    }

    #[test]
    fn test_tier_hypothesis_when_rejected_and_bare() {
        let mut m = base_memory();
        m.review_status = ReviewStatus::Rejected;
        assert_eq!(derive_confidence_tier(&m), ConfidenceTier::Hypothesis);
    }

    #[test]
    fn test_line_range_validation() {
        assert!(CodeRef::line_range("a.rs", 5, 3).is_err());
        assert!(CodeRef::line_range("a.rs", 0, 3).is_err());
        assert!(CodeRef::line_range("a.rs", 3, 3).is_ok());
    }

    #[test]
    fn test_unknown_object_type_is_validation_error() {
        assert!(matches!(
            ObjectType::try_parse("musing"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_auto_approve_policy() {
        let mut input = MemoryInput::new(ObjectType::Constraint, "Never commit secrets");
        assert!(!input.auto_approve());
        input.confidence = Confidence::High;
        assert!(!input.auto_approve());
        input.evidence_event_ids = vec!["e1".into()];
        assert!(input.auto_approve());
    }
}
