//! Context Packs
//!
//! Progressive disclosure of memories under a token budget. Packs never
//! split a memory: assembly walks the ranked list and stops at the first
//! entry that would overflow the budget. Serving a pack is the one retrieval
//! path with side effects, recording the disclosure in the session.

use serde::{Deserialize, Serialize};

use crate::content::estimate_tokens;
use crate::error::Result;
use crate::memory::{ConfidenceTier, MemoryFilter, MemoryObject, MemoryStatus, ObjectType};
use crate::retrieval::{reinforcement, Retriever, SearchMode, SearchOptions};
use crate::session::DisclosureLevel;

use super::EscalationReason;

/// Request for a context pack.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub level: DisclosureLevel,
    /// Query for the task/deep hybrid leg
    pub query: Option<String>,
    /// Override the level's default token budget
    pub token_budget: Option<i64>,
    /// File the agent is working in; drives scope weighting and relatedness
    pub file_path: Option<String>,
    /// Session to de-duplicate against and record the disclosure in
    pub session_id: Option<String>,
    /// Extra ids to exclude beyond the session's injected set
    pub exclude_ids: Vec<String>,
    /// When the pack was requested by an escalation signal
    pub escalation: Option<EscalationReason>,
}

/// Tier composition of a served pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub grounded: usize,
    pub observed: usize,
    pub inferred: usize,
}

/// Pack metadata for diagnostics and budget accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPackMetadata {
    pub tokens_used: i64,
    pub token_budget: i64,
    pub tier_breakdown: TierBreakdown,
}

/// A bounded, ranked set of memories fitting a token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPack {
    pub objects: Vec<MemoryObject>,
    /// Ranked candidates before budget packing
    pub total_count: usize,
    pub metadata: ContextPackMetadata,
}

impl Retriever {
    /// Assemble a context pack at the requested disclosure level.
    pub fn get_context(&self, request: &ContextRequest) -> Result<ContextPack> {
        let budget = request
            .token_budget
            .unwrap_or_else(|| request.level.default_budget());

        let mut exclude: Vec<String> = request.exclude_ids.clone();
        if let Some(session_id) = &request.session_id {
            if let Some(session) = self.sessions.get(session_id)? {
                exclude.extend(session.injected_memory_ids);
            }
        }

        let mut ranked = self.ranked_candidates(request)?;
        ranked.retain(|m| !exclude.contains(&m.id));
        let total_count = ranked.len();

        // Fill in rank order until the next memory would overflow; never
        // split a memory
        let mut objects = Vec::new();
        let mut tokens_used = 0i64;
        for memory in ranked {
            let cost = estimate_tokens(&memory.content);
            if tokens_used + cost > budget {
                break;
            }
            tokens_used += cost;
            objects.push(memory);
        }

        let mut tier_breakdown = TierBreakdown::default();
        for m in &objects {
            match m.confidence_tier {
                ConfidenceTier::Grounded => tier_breakdown.grounded += 1,
                ConfidenceTier::Observed => tier_breakdown.observed += 1,
                ConfidenceTier::Inferred | ConfidenceTier::Hypothesis => {
                    tier_breakdown.inferred += 1
                }
            }
        }

        if let Some(session_id) = &request.session_id {
            let ids: Vec<String> = objects.iter().map(|m| m.id.clone()).collect();
            let reset_errors = request.escalation == Some(EscalationReason::ErrorBurst);
            self.sessions
                .record_disclosure(session_id, request.level, &ids, reset_errors)?;
            if let Err(e) = self.store.record_access(&ids) {
                tracing::debug!("access recording failed: {}", e);
            }
        }

        Ok(ContextPack {
            objects,
            total_count,
            metadata: ContextPackMetadata {
                tokens_used,
                token_budget: budget,
                tier_breakdown,
            },
        })
    }

    /// The level's composition, ranked and de-duplicated.
    fn ranked_candidates(&self, request: &ContextRequest) -> Result<Vec<MemoryObject>> {
        let mut out: Vec<MemoryObject> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut push = |memories: Vec<MemoryObject>, out: &mut Vec<MemoryObject>| {
            for m in memories {
                if seen.insert(m.id.clone()) {
                    out.push(m);
                }
            }
        };

        // Every level starts with active constraints
        push(self.active_constraints(request)?, &mut out);
        if request.level == DisclosureLevel::Minimal {
            return Ok(out);
        }

        // Task: top hybrid matches for the query, stale included at penalty
        if let Some(query) = &request.query {
            let options = SearchOptions {
                limit: 20,
                mode: SearchMode::Hybrid,
                statuses: vec![MemoryStatus::Active, MemoryStatus::Stale],
                file_path: request.file_path.clone(),
                ..Default::default()
            };
            let matches = self
                .search(query, &options)?
                .into_iter()
                .map(|r| r.memory)
                .collect();
            push(matches, &mut out);
        }
        if request.level == DisclosureLevel::Task {
            return Ok(out);
        }

        // Deep: related decisions/conventions by scope, then recent failures
        push(self.scoped_guidance(request)?, &mut out);
        push(self.recent_failed_attempts()?, &mut out);
        Ok(out)
    }

    /// Active constraints ranked by their reinforcement weight. Hot
    /// memories (access count) tie-break equal weights.
    fn active_constraints(&self, request: &ContextRequest) -> Result<Vec<MemoryObject>> {
        let mut constraints = self.store.list(&MemoryFilter {
            statuses: vec![MemoryStatus::Active],
            object_types: Some(vec![ObjectType::Constraint]),
            limit: 200,
            ..Default::default()
        })?;
        constraints.sort_by(|a, b| {
            let wa = reinforcement(a, request.file_path.as_deref());
            let wb = reinforcement(b, request.file_path.as_deref());
            wb.partial_cmp(&wa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.access_count.cmp(&a.access_count))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(constraints)
    }

    /// Decisions and conventions whose scope covers the working file, or
    /// project-wide ones when no file is known.
    fn scoped_guidance(&self, request: &ContextRequest) -> Result<Vec<MemoryObject>> {
        let mut guidance = self.store.list(&MemoryFilter {
            statuses: vec![MemoryStatus::Active, MemoryStatus::Stale],
            object_types: Some(vec![ObjectType::Decision, ObjectType::Convention]),
            limit: 200,
            ..Default::default()
        })?;
        if let Some(file) = &request.file_path {
            guidance.retain(|m| match &m.scope.path {
                Some(path) => file.starts_with(path.as_str()),
                None => true,
            });
        }
        guidance.sort_by(|a, b| {
            let wa = reinforcement(a, request.file_path.as_deref());
            let wb = reinforcement(b, request.file_path.as_deref());
            wb.partial_cmp(&wa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        guidance.truncate(30);
        Ok(guidance)
    }

    /// Most recent failed attempts, newest first.
    fn recent_failed_attempts(&self) -> Result<Vec<MemoryObject>> {
        self.store.list(&MemoryFilter {
            statuses: vec![MemoryStatus::Active, MemoryStatus::Stale],
            object_types: Some(vec![ObjectType::FailedAttempt]),
            limit: 10,
            ..Default::default()
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
