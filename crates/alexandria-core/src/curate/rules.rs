//! Deterministic Curator
//!
//! The always-on rule tier. Three extractors over an episode:
//! error→resolution (`known_fix`), user correction (`constraint`) and
//! repeated pattern (`convention`). This tier never emits `decision` or
//! `preference`; those require LLM curation. All pattern sets are named
//! tables so tests can enumerate them.

use chrono::Duration;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::content::normalized_prefix;
use crate::curate::{Candidate, Episode, EpisodeEvent, Extractor};
use crate::error::Result;
use crate::events::EventType;
use crate::memory::{Confidence, ObjectType, Scope};
use crate::normalize::{extract_error_signature, is_excluded};

/// How far ahead of a failing tool call a successful one may resolve it.
pub const FIX_WINDOW_MINUTES: i64 = 5;

/// Occurrences required before a repeated phrase becomes a convention.
pub const CONVENTION_MIN_OCCURRENCES: usize = 3;

/// Occurrences at which a convention is high confidence.
pub const CONVENTION_HIGH_OCCURRENCES: usize = 5;

/// Fix-description patterns scanned between an error and its resolution.
static FIX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:fix|fixed|solved|resolved)\s+(?:by|with|via)\s+(.+)",
        r"(?i)\bthe\s+(?:issue|problem)\s+(?:was|is)\s+(.+)",
        r"(?i)\b(?:changed|modified|updated|added)\s+(.+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("fix pattern"))
    .collect()
});

/// Must-severity correction patterns: high confidence constraints.
static CORRECTION_MUST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:don't|do not|never)\s+\S+.*",
        r"(?i)\b(?:must|required to|have to)\s+always\s+.+",
        r"(?i)\b(?:you\s+)?(?:must|should)\s+never\s+.+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("must correction pattern"))
    .collect()
});

/// Should-severity correction patterns: medium confidence, only honored when
/// the utterance opens with a rejection marker.
static CORRECTION_SHOULD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:please\s+)?(?:always|make sure to)\s+.+",
        r"(?i)\b(?:you\s+)?should\s+(?:always\s+)?.+",
        r"(?i)\b(?:instead|rather),?\s+.+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("should correction pattern"))
    .collect()
});

static REJECTION_OPENER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(no|nope|wrong|incorrect|don't|stop)\b").expect("rejection opener pattern")
});

/// Convention indicator patterns; the full match is the tracked phrase.
static CONVENTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\buse\s+\S+\s+for\s+\S+(?:\s+\S+)?",
        r"(?i)\bname\s+\S+\s+as\s+\S+",
        r"(?i)\bfollow\s+the\s+\S+\s+(?:pattern|convention)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("convention pattern"))
    .collect()
});

/// The deterministic tier-0 extractor.
#[derive(Debug, Default)]
pub struct RuleCurator;

impl RuleCurator {
    pub fn new() -> Self {
        Self
    }

    /// Error→resolution: a failing tool call whose output yields an error
    /// signature, resolved by a succeeding tool call within the fix window.
    fn extract_known_fixes(&self, episode: &Episode) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for (i, failure) in episode.tool_sequences.iter().enumerate() {
            if failure.exit_code.unwrap_or(0) == 0 {
                continue;
            }
            let Some(signature) = extract_error_signature(&failure.output) else {
                continue;
            };

            let deadline = failure.timestamp + Duration::minutes(FIX_WINDOW_MINUTES);
            let Some(success) = episode.tool_sequences[i + 1..]
                .iter()
                .find(|t| t.exit_code == Some(0) && t.timestamp <= deadline)
            else {
                continue;
            };

            let description = episode
                .events
                .iter()
                .filter(|e| {
                    e.event.timestamp >= failure.timestamp
                        && e.event.timestamp <= success.timestamp
                        && e.event.id != failure.event_id
                })
                .find_map(|e| find_fix_description(&e.content))
                .or_else(|| {
                    matches!(success.tool.as_str(), "edit" | "write")
                        .then(|| format!("Applied {} operation", success.tool))
                });
            let Some(description) = description else {
                continue;
            };

            candidates.push(Candidate {
                object_type: ObjectType::KnownFix,
                content: format!("Fix for \"{}\": {}", signature, description),
                confidence: Confidence::High,
                evidence_event_ids: vec![failure.event_id.clone(), success.event_id.clone()],
                evidence_excerpt: Some(signature),
                code_refs: vec![],
                scope: Scope::project(),
            });
        }

        candidates
    }

    /// User correction: strong directives in turn events become constraints.
    fn extract_corrections(&self, events: &[&EpisodeEvent]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for e in events {
            if e.event.event_type != EventType::Turn || is_excluded(&e.content) {
                continue;
            }
            let content = e.content.trim();

            let confidence = if CORRECTION_MUST_PATTERNS.iter().any(|p| p.is_match(content)) {
                Some(Confidence::High)
            } else if REJECTION_OPENER_RE.is_match(content)
                && CORRECTION_SHOULD_PATTERNS.iter().any(|p| p.is_match(content))
            {
                Some(Confidence::Medium)
            } else {
                None
            };

            if let Some(confidence) = confidence {
                candidates.push(Candidate {
                    object_type: ObjectType::Constraint,
                    content: content.to_string(),
                    confidence,
                    evidence_event_ids: vec![e.event.id.clone()],
                    evidence_excerpt: None,
                    code_refs: vec![],
                    scope: Scope::project(),
                });
            }
        }

        candidates
    }

    /// Repeated pattern: convention-indicator phrases seen three or more
    /// times across the episode.
    fn extract_conventions(&self, events: &[&EpisodeEvent]) -> Vec<Candidate> {
        // phrase key -> (display phrase, occurrence count, evidence ids)
        let mut tallies: HashMap<String, (String, usize, Vec<String>)> = HashMap::new();

        for e in events {
            if is_excluded(&e.content) {
                continue;
            }
            for pattern in CONVENTION_PATTERNS.iter() {
                for m in pattern.find_iter(&e.content) {
                    let phrase = m.as_str().trim().to_string();
                    let key = normalized_prefix(&phrase);
                    let entry = tallies.entry(key).or_insert_with(|| {
                        (phrase.clone(), 0, Vec::new())
                    });
                    entry.1 += 1;
                    if !entry.2.contains(&e.event.id) {
                        entry.2.push(e.event.id.clone());
                    }
                }
            }
        }

        let mut phrases: Vec<(String, usize, Vec<String>)> = tallies.into_values().collect();
        phrases.sort_by(|a, b| a.0.cmp(&b.0));

        phrases
            .into_iter()
            .filter(|(_, count, _)| *count >= CONVENTION_MIN_OCCURRENCES)
            .map(|(phrase, count, evidence)| Candidate {
                object_type: ObjectType::Convention,
                content: phrase,
                confidence: if count >= CONVENTION_HIGH_OCCURRENCES {
                    Confidence::High
                } else {
                    Confidence::Medium
                },
                evidence_event_ids: evidence,
                evidence_excerpt: None,
                code_refs: vec![],
                scope: Scope::project(),
            })
            .collect()
    }
}

fn find_fix_description(content: &str) -> Option<String> {
    for pattern in FIX_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(content) {
            let desc = caps.get(1)?.as_str().trim();
            if !desc.is_empty() {
                return Some(desc.chars().take(300).collect());
            }
        }
    }
    None
}

impl Extractor for RuleCurator {
    fn extract(&self, episode: &Episode) -> Result<Vec<Candidate>> {
        let unique = episode.unique_events();

        // Exclusion rules are enforced at the source: excluded events never
        // feed the correction or convention extractors
        let mut candidates = self.extract_known_fixes(episode);
        candidates.extend(self.extract_corrections(&unique));
        candidates.extend(self.extract_conventions(&unique));
        Ok(candidates)
    }
}

// ============================================================================
// TESTS
// ============================================================================
