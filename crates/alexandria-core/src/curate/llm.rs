//! LLM Curator
//!
//! Tier-1/2 extraction behind the [`LanguageModel`] capability trait. The
//! model is prompted with a structured schema over the seven object types
//! and must answer with a JSON `memories` array; anything unparseable is
//! discarded at debug level. A model failure degrades the checkpoint to the
//! deterministic tier, it never aborts it.

use serde::Deserialize;
use std::sync::Arc;

use crate::curate::{Candidate, Episode, Extractor};
use crate::error::Result;
use crate::memory::{Confidence, ObjectType, Scope};
use crate::normalize::is_excluded;

/// Language-model error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// The provider could not be reached or refused the request
    #[error("llm request failed: {0}")]
    Request(String),
    /// The provider answered with something unusable
    #[error("llm response unusable: {0}")]
    BadResponse(String),
}

/// The language model as the core sees it: prompt in, completion out.
/// Injected at construction; providers live outside the core.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError>;
}

/// Maximum events included in the curation prompt.
const PROMPT_EVENT_LIMIT: usize = 40;

/// Maximum chars of one event's content in the prompt.
const PROMPT_EVENT_CHARS: usize = 400;

#[derive(Debug, Deserialize)]
struct LlmMemories {
    #[serde(default)]
    memories: Vec<LlmMemory>,
}

#[derive(Debug, Deserialize)]
struct LlmMemory {
    #[serde(rename = "type")]
    object_type: String,
    content: String,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
    #[serde(default)]
    confidence: String,
}

/// Extract the first balanced `{...}` region from free-form model output.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            if c != '\\' {
                escaped = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Tier-1/2 extractor calling an injected language model.
pub struct LlmCurator {
    model: Arc<dyn LanguageModel>,
}

impl LlmCurator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(&self, episode: &Episode) -> String {
        let mut transcript = String::new();
        for e in episode.unique_events().into_iter().take(PROMPT_EVENT_LIMIT) {
            if is_excluded(&e.content) {
                continue;
            }
            let snippet: String = e.content.chars().take(PROMPT_EVENT_CHARS).collect();
            transcript.push_str(&format!(
                "[{}{}] {}\n",
                e.event.event_type,
                e.event
                    .tool_name
                    .as_deref()
                    .map(|t| format!(" {t}"))
                    .unwrap_or_default(),
                snippet
            ));
        }

        format!(
            "You distill coding-session events into durable memories.\n\
             Allowed types: decision, preference, convention, known_fix, constraint, failed_attempt, environment.\n\
             Only extract facts worth remembering across sessions. Skip chatter and narration.\n\
             Respond with JSON only, shaped as:\n\
             {{\"memories\": [{{\"type\": \"...\", \"content\": \"...\", \"reasoning\": \"...\", \"confidence\": \"certain|high|medium|low\"}}]}}\n\
             \n\
             Session events:\n{transcript}"
        )
    }

    fn parse_response(&self, response: &str, episode: &Episode) -> Vec<Candidate> {
        let Some(json) = extract_json_object(response) else {
            tracing::debug!("llm curation response had no JSON object");
            return vec![];
        };
        let parsed: LlmMemories = match serde_json::from_str(json) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("llm curation response failed schema: {}", e);
                return vec![];
            }
        };

        let evidence: Vec<String> = episode
            .events
            .iter()
            .map(|e| e.event.id.clone())
            .take(10)
            .collect();

        parsed
            .memories
            .into_iter()
            .filter_map(|m| {
                let object_type = match ObjectType::try_parse(&m.object_type) {
                    Ok(t) => t,
                    Err(_) => {
                        tracing::debug!("discarding llm memory with type {:?}", m.object_type);
                        return None;
                    }
                };
                let content = m.content.trim().to_string();
                if content.is_empty() || is_excluded(&content) {
                    return None;
                }
                Some(Candidate {
                    object_type,
                    content,
                    confidence: Confidence::parse_name(&m.confidence),
                    evidence_event_ids: evidence.clone(),
                    evidence_excerpt: None,
                    code_refs: vec![],
                    scope: Scope::project(),
                })
            })
            .collect()
    }
}

impl Extractor for LlmCurator {
    fn extract(&self, episode: &Episode) -> Result<Vec<Candidate>> {
        if episode.is_empty() {
            return Ok(vec![]);
        }
        let prompt = self.build_prompt(episode);
        match self.model.complete(&prompt) {
            Ok(response) => Ok(self.parse_response(&response, episode)),
            Err(e) => {
                tracing::debug!("llm curation unavailable, falling back to rules: {}", e);
                Ok(vec![])
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
