//! Retrieval Engine
//!
//! Hybrid lexical + vector search over memory objects with confidence-tier,
//! recency, scope, outcome and heat reinforcement, level-bounded context
//! packs and escalation detection. `search` is read-only and deterministic
//! for a fixed database state; only `get_context` records accesses.

mod context;
mod escalation;
mod router;

pub use context::{ContextPack, ContextPackMetadata, ContextRequest, TierBreakdown};
pub use escalation::{detect_escalation, EscalationReason, EscalationSignal};
pub use router::{classify_intent, expand_query, plan_for, QueryIntent, RetrievalPlan};

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::index::{FtsIndex, VectorStore};
use crate::memory::{
    MemoryObject, MemoryStatus, MemoryStore, ObjectType, ReviewStatus, ScopeType,
};
use crate::session::SessionStore;

/// Capacity of the query-embedding cache.
const QUERY_CACHE_CAPACITY: usize = 100;

/// Days after which recency decay bottoms out at 0.8 (then floors at 0.5).
const RECENCY_HORIZON_DAYS: f64 = 90.0;

/// Search mode override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Vector,
    #[default]
    Hybrid,
}

/// How a result was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Lexical,
    Vector,
    Hybrid,
}

/// Options for [`Retriever::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub mode: SearchMode,
    pub statuses: Vec<MemoryStatus>,
    pub object_types: Option<Vec<ObjectType>>,
    pub scope_type: Option<ScopeType>,
    pub review_status: Option<ReviewStatus>,
    /// File the agent is working in; drives the scope boost
    pub file_path: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            mode: SearchMode::Hybrid,
            statuses: vec![MemoryStatus::Active],
            object_types: None,
            scope_type: None,
            review_status: None,
            file_path: None,
        }
    }
}

/// A scored search result with component diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    pub memory: MemoryObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    pub combined_score: f32,
    pub match_type: MatchType,
}

/// The hybrid retriever.
pub struct Retriever {
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) sessions: Arc<SessionStore>,
    fts: Arc<FtsIndex>,
    vectors: Arc<VectorStore>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Retriever {
    pub fn new(
        store: Arc<MemoryStore>,
        sessions: Arc<SessionStore>,
        fts: Arc<FtsIndex>,
        vectors: Arc<VectorStore>,
    ) -> Self {
        Self {
            store,
            sessions,
            fts,
            vectors,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("cache capacity is non-zero"),
            )),
        }
    }

    /// Hybrid search over memories. Read-only: repeated calls against the
    /// same database state return the same ranked sequence.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredMemory>> {
        let plan = plan_for(classify_intent(query));
        let (lexical_weight, vector_weight) = match options.mode {
            SearchMode::Lexical => (1.0, 0.0),
            SearchMode::Vector => (0.0, 1.0),
            SearchMode::Hybrid => (plan.lexical_weight, plan.vector_weight),
        };
        let pool = plan.k.max(options.limit * 2);

        let lexical: HashMap<String, f32> = if lexical_weight > 0.0 {
            self.fts
                .search_memories(query, pool)?
                .into_iter()
                .map(|h| (h.id, h.score))
                .collect()
        } else {
            HashMap::new()
        };

        let vector: HashMap<String, f32> = if vector_weight > 0.0 {
            self.vector_leg(query, plan.intent, pool)?
        } else {
            HashMap::new()
        };

        let mut results = Vec::new();
        let mut ids: Vec<&String> = lexical.keys().chain(vector.keys()).collect();
        ids.sort();
        ids.dedup();

        for id in ids {
            let Some(memory) = self.store.get(id)? else {
                continue;
            };
            if !passes_filters(&memory, options) {
                continue;
            }

            let lexical_score = lexical.get(id).copied();
            let vector_score = vector.get(id).copied();
            let fused = lexical_score.unwrap_or(0.0) * lexical_weight
                + vector_score.unwrap_or(0.0) * vector_weight;

            let boosted = fused
                * reinforcement(&memory, options.file_path.as_deref())
                * plan.type_boost(memory.object_type);
            let combined_score = boosted.clamp(0.0, 1.0);
            if combined_score <= 0.0 {
                continue;
            }

            let match_type = match (lexical_score.is_some(), vector_score.is_some()) {
                (true, true) => MatchType::Hybrid,
                (false, true) => MatchType::Vector,
                _ => MatchType::Lexical,
            };

            results.push(ScoredMemory {
                memory,
                lexical_score,
                vector_score,
                combined_score,
                match_type,
            });
        }

        // Deterministic: score descending, id ascending on ties
        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        results.truncate(options.limit);
        Ok(results)
    }

    /// Vector leg with the query-embedding cache and intent-aware expansion:
    /// conceptual intents search with the centroid of template variants.
    fn vector_leg(
        &self,
        query: &str,
        intent: QueryIntent,
        pool: usize,
    ) -> Result<HashMap<String, f32>> {
        let cache_key = format!("{}|{:?}", query, intent);
        let cached = {
            let mut cache = self
                .query_cache
                .lock()
                .map_err(|_| crate::error::EngineError::Lock("query cache"))?;
            cache.get(&cache_key).cloned()
        };

        let embedding = match cached {
            Some(v) => Some(v),
            None => {
                let variants = expand_query(query, intent);
                let embeddings: Vec<Vec<f32>> = variants
                    .iter()
                    .filter_map(|v| self.vectors.embed(v))
                    .collect();
                let centroid = match embeddings.len() {
                    0 => None,
                    1 => embeddings.into_iter().next(),
                    _ => Some(centroid(&embeddings)),
                };
                if let Some(v) = &centroid {
                    let mut cache = self
                        .query_cache
                        .lock()
                        .map_err(|_| crate::error::EngineError::Lock("query cache"))?;
                    cache.put(cache_key, v.clone());
                }
                centroid
            }
        };

        let Some(embedding) = embedding else {
            return Ok(HashMap::new());
        };

        let hits = self.vectors.search_objects_by_vector(&embedding, pool)?;
        let max = hits
            .iter()
            .map(|(_, s)| *s)
            .fold(0.0_f32, f32::max)
            .max(f32::EPSILON);
        Ok(hits
            .into_iter()
            .map(|(id, s)| (id, (s / max).clamp(0.0, 1.0)))
            .collect())
    }
}

/// L2-normalized mean of several embeddings.
fn centroid(embeddings: &[Vec<f32>]) -> Vec<f32> {
    let dim = embeddings[0].len();
    let count = embeddings.len() as f32;
    let mut out = vec![0.0f32; dim];
    for e in embeddings {
        for (i, v) in e.iter().enumerate().take(dim) {
            out[i] += v;
        }
    }
    for v in &mut out {
        *v /= count;
    }
    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut out {
            *v /= norm;
        }
    }
    out
}

fn passes_filters(memory: &MemoryObject, options: &SearchOptions) -> bool {
    if !options.statuses.is_empty() && !options.statuses.contains(&memory.status) {
        return false;
    }
    if let Some(types) = &options.object_types {
        if !types.contains(&memory.object_type) {
            return false;
        }
    }
    if let Some(scope) = options.scope_type {
        if memory.scope.scope_type != scope {
            return false;
        }
    }
    if let Some(review) = options.review_status {
        if memory.review_status != review {
            return false;
        }
    }
    true
}

/// The multiplicative reinforcement stack from the spec: confidence tier,
/// recency, scope, outcome score, access heat, status, plus the strength
/// hint. Applied to the fused score, then clamped by the caller.
pub(crate) fn reinforcement(memory: &MemoryObject, file_path: Option<&str>) -> f32 {
    let tier = memory.confidence_tier.score_multiplier();

    let reference = memory.last_verified_at.unwrap_or(memory.updated_at);
    let days = (Utc::now() - reference).num_seconds().max(0) as f64 / 86_400.0;
    let recency = (1.0 - 0.2 * (days / RECENCY_HORIZON_DAYS)).max(0.5) as f32;

    let scope = match (&memory.scope.path, file_path) {
        (Some(scope_path), Some(file)) if file.starts_with(scope_path.as_str()) => 1.25,
        _ if memory.scope.scope_type == ScopeType::Project => 1.10,
        _ => 1.0,
    };

    let outcome = 0.8 + 0.4 * memory.outcome_score as f32;

    let heat = 1.0 + 0.1 * (memory.access_count.min(50) as f32 / 50.0);

    let status = memory.status.score_multiplier();

    let strength = (memory.strength as f32).clamp(0.5, 1.5);

    tier * recency * scope * outcome * heat * status * strength
}

// ============================================================================
// TESTS
// ============================================================================
