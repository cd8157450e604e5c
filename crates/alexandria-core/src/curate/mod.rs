//! Curators
//!
//! Turn a buffered episode of events into memory candidates. The
//! deterministic rule tier always runs; the LLM tiers are optional and sit
//! behind the [`LanguageModel`] capability trait. Candidates from multiple
//! tiers are merged by normalized-prefix key, keeping the higher confidence.

mod llm;
mod rules;

pub use llm::{extract_json_object, LanguageModel, LlmCurator, LlmError};
pub use rules::RuleCurator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::content::normalized_prefix;
use crate::error::Result;
use crate::events::{Event, EventType};
use crate::memory::{CodeRef, Confidence, ObjectType, Scope};

/// Which extraction tiers run during a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurationTier {
    /// Deterministic rules only
    #[default]
    Rules,
    /// Rules + LLM extraction
    Assisted,
    /// Rules + LLM extraction + conflict detection on apply
    Gated,
}

impl CurationTier {
    pub fn uses_llm(&self) -> bool {
        matches!(self, CurationTier::Assisted | CurationTier::Gated)
    }

    pub fn detects_conflicts(&self) -> bool {
        matches!(self, CurationTier::Gated)
    }
}

/// An event paired with its resolved content.
#[derive(Debug, Clone)]
pub struct EpisodeEvent {
    pub event: Event,
    pub content: String,
}

/// One recorded tool invocation inside an episode.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool: String,
    pub exit_code: Option<i64>,
    pub output: String,
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
}

/// The bounded event window flushed by a checkpoint trigger.
#[derive(Debug, Clone)]
pub struct Episode {
    pub events: Vec<EpisodeEvent>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tool_sequences: Vec<ToolCall>,
}

impl Episode {
    /// Build an episode from buffered events.
    pub fn from_events(events: Vec<EpisodeEvent>) -> Self {
        let start_time = events
            .first()
            .map(|e| e.event.timestamp)
            .unwrap_or_else(Utc::now);
        let end_time = events
            .last()
            .map(|e| e.event.timestamp)
            .unwrap_or(start_time);
        let tool_sequences = events
            .iter()
            .filter(|e| e.event.event_type == EventType::ToolOutput)
            .map(|e| ToolCall {
                tool: e
                    .event
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                exit_code: e.event.exit_code,
                output: e.content.clone(),
                timestamp: e.event.timestamp,
                event_id: e.event.id.clone(),
            })
            .collect();
        Self {
            events,
            start_time,
            end_time,
            tool_sequences,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events deduplicated by content hash, first occurrence kept. Repeated
    /// identical events contribute one shot at candidate extraction.
    pub fn unique_events(&self) -> Vec<&EpisodeEvent> {
        let mut seen = std::collections::HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.event.content_hash.clone()))
            .collect()
    }
}

/// A curator's proposal for a memory object; not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub object_type: ObjectType,
    pub content: String,
    pub confidence: Confidence,
    pub evidence_event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_excerpt: Option<String>,
    pub code_refs: Vec<CodeRef>,
    pub scope: Scope,
}

/// A curation tier over an episode.
pub trait Extractor {
    fn extract(&self, episode: &Episode) -> Result<Vec<Candidate>>;
}

/// Merge candidates from several tiers. Key: lowercased,
/// whitespace-collapsed first 100 chars of content. On collision the higher
/// confidence wins; ties keep the earlier tier's candidate.
pub fn merge_candidates(tiers: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut by_key: HashMap<String, Candidate> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for tier in tiers {
        for candidate in tier {
            let key = normalized_prefix(&candidate.content);
            match by_key.get(&key) {
                Some(existing) if existing.confidence.rank() >= candidate.confidence.rank() => {}
                Some(_) => {
                    by_key.insert(key, candidate);
                }
                None => {
                    order.push(key.clone());
                    by_key.insert(key, candidate);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

/// Episode-level code refs extracted from event file paths and diff headers,
/// attached to every candidate of the episode.
pub fn episode_code_refs(episode: &Episode) -> Vec<CodeRef> {
    let mut seen = std::collections::HashSet::new();
    let mut refs = Vec::new();
    for e in &episode.events {
        if let Some(path) = &e.event.file_path {
            if seen.insert(path.clone()) {
                refs.push(CodeRef::file(path.clone()));
            }
        }
        if e.event.event_type == EventType::Diff {
            for changed in crate::normalize::normalize(
                &e.content,
                Some(EventType::Diff),
                &crate::normalize::EventMeta::default(),
                &crate::normalize::NormalizerConfig::default(),
            )
            .signals
            .files_changed
            {
                if seen.insert(changed.clone()) {
                    refs.push(CodeRef::file(changed));
                }
            }
        }
    }
    refs
}

// ============================================================================
// TESTS
// ============================================================================
