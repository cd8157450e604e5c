//! Intent Router
//!
//! Regex classification of query intent and the retrieval plan it selects.
//! Plans reorder weights and priorities; they never hide an object type.
//! The LLM plays no part here; it exists only inside the curators.

use regex::Regex;
use std::sync::LazyLock;

use crate::memory::ObjectType;

/// Query intent classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// "what did we decide", "why did we"
    History,
    /// "how do I", "where is", building something
    Implementation,
    /// errors, stack traces, "how did we fix"
    Debugging,
    /// plain facts about the environment or project
    Factual,
    /// step-by-step process questions
    Procedural,
}

static HISTORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what did we|why did we|decided?|decision|chose|choose|agreed)\b")
        .expect("history pattern")
});

static DEBUGGING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(error|fail(s|ed|ing)?|broken|crash|panic|exception|bug|fix(ed)?|traceback|stack trace)\b",
    )
    .expect("debugging pattern")
});

static PROCEDURAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(how (do|to|can) (i|we|you)|steps to|process for|workflow)\b")
        .expect("procedural pattern")
});

static FACTUAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what (is|are)|which|version|where (is|are)|who)\b").expect("factual pattern")
});

/// Classify a query's intent from surface cues.
pub fn classify_intent(query: &str) -> QueryIntent {
    if DEBUGGING_RE.is_match(query) {
        return QueryIntent::Debugging;
    }
    if HISTORY_RE.is_match(query) {
        return QueryIntent::History;
    }
    if PROCEDURAL_RE.is_match(query) {
        return QueryIntent::Procedural;
    }
    if FACTUAL_RE.is_match(query) {
        return QueryIntent::Factual;
    }
    QueryIntent::Implementation
}

/// A retrieval plan: fusion weights, candidate pool size and which types to
/// favor. Priority types get a mild boost; nothing is filtered out.
#[derive(Debug, Clone)]
pub struct RetrievalPlan {
    pub intent: QueryIntent,
    pub lexical_weight: f32,
    pub vector_weight: f32,
    pub k: usize,
    pub priority_types: Vec<ObjectType>,
}

impl RetrievalPlan {
    /// Boost multiplier for one type under this plan.
    pub fn type_boost(&self, object_type: ObjectType) -> f32 {
        if self.priority_types.contains(&object_type) {
            1.2
        } else {
            1.0
        }
    }
}

impl Default for RetrievalPlan {
    fn default() -> Self {
        Self {
            intent: QueryIntent::Implementation,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            k: 20,
            priority_types: vec![],
        }
    }
}

/// Select the plan for an intent.
pub fn plan_for(intent: QueryIntent) -> RetrievalPlan {
    match intent {
        QueryIntent::History => RetrievalPlan {
            intent,
            lexical_weight: 0.35,
            vector_weight: 0.65,
            k: 20,
            priority_types: vec![ObjectType::Decision, ObjectType::Preference],
        },
        QueryIntent::Implementation => RetrievalPlan {
            intent,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            k: 20,
            priority_types: vec![ObjectType::Convention, ObjectType::Decision],
        },
        QueryIntent::Debugging => RetrievalPlan {
            intent,
            // Error strings are literal; favor the lexical leg
            lexical_weight: 0.65,
            vector_weight: 0.35,
            k: 30,
            priority_types: vec![
                ObjectType::KnownFix,
                ObjectType::FailedAttempt,
                ObjectType::Constraint,
            ],
        },
        QueryIntent::Factual => RetrievalPlan {
            intent,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            k: 15,
            priority_types: vec![ObjectType::Environment, ObjectType::Constraint],
        },
        QueryIntent::Procedural => RetrievalPlan {
            intent,
            lexical_weight: 0.4,
            vector_weight: 0.6,
            k: 20,
            priority_types: vec![ObjectType::KnownFix, ObjectType::Convention],
        },
    }
}

/// Template variants for conceptual queries; their embedding centroid gives
/// the vector leg a broader target than the raw query.
pub fn expand_query(query: &str, intent: QueryIntent) -> Vec<String> {
    let clean = query.trim().trim_end_matches('?').trim_end_matches('.');
    let mut variants = vec![query.to_string()];
    match intent {
        QueryIntent::History => {
            variants.push(format!("the decision about {clean} and its rationale"));
            variants.push(format!("{clean} was decided because"));
        }
        QueryIntent::Procedural => {
            variants.push(format!("the steps to {clean} are"));
            variants.push(format!("to {clean} you need to"));
        }
        QueryIntent::Factual => {
            variants.push(format!("facts about {clean}"));
        }
        // Debugging and implementation queries carry literal identifiers;
        // keep the raw query only
        QueryIntent::Debugging | QueryIntent::Implementation => {}
    }
    variants
}

// ============================================================================
// TESTS
// ============================================================================
