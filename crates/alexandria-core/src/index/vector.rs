//! Vector Index
//!
//! Nearest-neighbor search over 384-d unit embeddings produced by a
//! pluggable [`Embedder`]. Two backends: HNSW via USearch when the
//! `vector-search` feature is enabled and index construction succeeds, and
//! an exact-cosine in-memory map otherwise. Both are hydrated at startup
//! from the persistent `event_embeddings` / `object_embeddings` mirrors, so
//! the index survives restarts without re-embedding.
//!
//! Embedding failures never fail ingestion; they log at debug level and the
//! entity simply has no vector presence until re-indexed.

use chrono::Utc;
use rusqlite::params;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::storage::Database;

/// Embedding dimensions expected from the embedder.
pub const EMBEDDING_DIMENSIONS: usize = 384;

// ============================================================================
// EMBEDDER CAPABILITY
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    /// The model is not available
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    /// Embedding generation failed
    #[error("embedding generation failed: {0}")]
    Failed(String),
    /// Wrong dimensionality
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

/// The embedding model as the core sees it: text in, vector out.
/// Injected at construction; the runtime behind it lives outside the core.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError>;
}

/// A semantic embedding vector with its byte codec for blob storage.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    /// L2-normalize in place.
    pub fn normalize(&mut self) {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut self.vector {
                *x /= norm;
            }
        }
    }

    /// Little-endian f32 bytes for blob storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Decode from blob bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

/// Cosine similarity between two vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ============================================================================
// BACKENDS
// ============================================================================

#[cfg(feature = "vector-search")]
struct HnswBackend {
    index: usearch::Index,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

#[cfg(feature = "vector-search")]
impl HnswBackend {
    fn create() -> Option<Self> {
        let options = usearch::IndexOptions {
            dimensions: EMBEDDING_DIMENSIONS,
            metric: usearch::MetricKind::Cos,
            quantization: usearch::ScalarKind::F32,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            multi: false,
        };
        usearch::Index::new(&options).ok().map(|index| Self {
            index,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    fn add(&mut self, key: &str, vector: &[f32]) -> std::result::Result<(), String> {
        if let Some(&existing) = self.key_to_id.get(key) {
            self.index.remove(existing).map_err(|e| e.to_string())?;
            self.reserve_for(self.index.size() + 1)?;
            return self
                .index
                .add(existing, vector)
                .map_err(|e| e.to_string());
        }
        self.reserve_for(self.index.size() + 1)?;
        let id = self.next_id;
        self.next_id += 1;
        self.index.add(id, vector).map_err(|e| e.to_string())?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    // usearch requires reserve() before add() to avoid segfaults
    fn reserve_for(&self, needed: usize) -> std::result::Result<(), String> {
        let capacity = self.index.capacity();
        if needed > capacity {
            let new_capacity = std::cmp::max(capacity * 2, 16).max(needed);
            self.index
                .reserve(new_capacity)
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            let _ = self.index.remove(id);
        }
    }

    fn search(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        if self.index.size() == 0 {
            return vec![];
        }
        let Ok(matches) = self.index.search(query, limit) else {
            return vec![];
        };
        matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(id, distance)| {
                self.id_to_key
                    .get(id)
                    .map(|key| (key.clone(), 1.0 - distance))
            })
            .collect()
    }
}

/// Exact-cosine fallback over an in-memory map, bounded by the number of
/// indexed entities and evicted only on delete.
#[derive(Default)]
struct ExactBackend {
    vectors: HashMap<String, Vec<f32>>,
}

impl ExactBackend {
    fn search(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(key, v)| (key.clone(), cosine_similarity(query, v)))
            .collect();
        // Deterministic order: similarity descending, id ascending
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}

enum Backend {
    #[cfg(feature = "vector-search")]
    Hnsw(HnswBackend),
    Exact(ExactBackend),
}

impl Backend {
    fn create() -> Self {
        #[cfg(feature = "vector-search")]
        {
            if let Some(hnsw) = HnswBackend::create() {
                return Backend::Hnsw(hnsw);
            }
            tracing::debug!("HNSW index creation failed, using exact cosine fallback");
        }
        Backend::Exact(ExactBackend::default())
    }

    fn add(&mut self, key: &str, vector: &[f32]) {
        match self {
            #[cfg(feature = "vector-search")]
            Backend::Hnsw(hnsw) => {
                if let Err(e) = hnsw.add(key, vector) {
                    tracing::debug!("HNSW add failed for {}: {}", key, e);
                }
            }
            Backend::Exact(exact) => {
                exact.vectors.insert(key.to_string(), vector.to_vec());
            }
        }
    }

    fn remove(&mut self, key: &str) {
        match self {
            #[cfg(feature = "vector-search")]
            Backend::Hnsw(hnsw) => hnsw.remove(key),
            Backend::Exact(exact) => {
                exact.vectors.remove(key);
            }
        }
    }

    fn search(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        match self {
            #[cfg(feature = "vector-search")]
            Backend::Hnsw(hnsw) => hnsw.search(query, limit),
            Backend::Exact(exact) => exact.search(query, limit),
        }
    }
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// Embedding store for events and memory objects: persistent blob mirrors in
/// SQLite plus an in-memory nearest-neighbor index per entity kind.
pub struct VectorStore {
    db: Arc<Database>,
    embedder: Option<Arc<dyn Embedder>>,
    events: Mutex<Backend>,
    objects: Mutex<Backend>,
}

impl VectorStore {
    /// Create the store and hydrate both indexes from the blob mirrors.
    pub fn new(db: Arc<Database>, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let store = Self {
            db,
            embedder,
            events: Mutex::new(Backend::create()),
            objects: Mutex::new(Backend::create()),
        };
        store.hydrate("event_embeddings", "event_id", &store.events)?;
        store.hydrate("object_embeddings", "object_id", &store.objects)?;
        Ok(store)
    }

    /// Whether an embedder was injected.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    fn hydrate(&self, table: &str, key_col: &str, index: &Mutex<Backend>) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let reader = self.db.read()?;
            let mut stmt =
                reader.prepare(&format!("SELECT {key_col}, embedding FROM {table}"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut guard = index.lock().map_err(|_| crate::error::EngineError::Lock("vector index"))?;
        for (key, bytes) in rows {
            if let Some(embedding) = Embedding::from_bytes(&bytes) {
                guard.add(&key, &embedding.vector);
            }
        }
        Ok(())
    }

    /// Embed text directly (for queries). Returns `None` when no embedder is
    /// configured or embedding fails.
    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text) {
            Ok(vector) => {
                let mut e = Embedding::new(vector);
                e.normalize();
                Some(e.vector)
            }
            Err(err) => {
                tracing::debug!("query embedding failed: {}", err);
                None
            }
        }
    }

    /// Index an event's text. Failures are logged and swallowed.
    pub fn index_event(&self, id: &str, text: &str) -> Result<()> {
        self.index_entity("event_embeddings", "event_id", &self.events, id, text)
    }

    /// Index a memory object's text. Failures are logged and swallowed.
    pub fn index_object(&self, id: &str, text: &str) -> Result<()> {
        self.index_entity("object_embeddings", "object_id", &self.objects, id, text)
    }

    fn index_entity(
        &self,
        table: &str,
        key_col: &str,
        index: &Mutex<Backend>,
        id: &str,
        text: &str,
    ) -> Result<()> {
        let Some(vector) = self.embed(text) else {
            tracing::debug!("skipping vector index for {}: no embedding", id);
            return Ok(());
        };

        {
            let writer = self.db.write()?;
            writer.execute(
                &format!(
                    "INSERT OR REPLACE INTO {table} ({key_col}, embedding, dimensions, created_at)
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params![
                    id,
                    Embedding::new(vector.clone()).to_bytes(),
                    vector.len() as i64,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }

        let mut guard = index
            .lock()
            .map_err(|_| crate::error::EngineError::Lock("vector index"))?;
        guard.add(id, &vector);
        Ok(())
    }

    /// k-NN over event embeddings; `(id, similarity)` descending.
    pub fn search_similar_events(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        self.search(&self.events, query, k)
    }

    /// k-NN over memory-object embeddings; `(id, similarity)` descending.
    pub fn search_similar_objects(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        self.search(&self.objects, query, k)
    }

    /// k-NN with a precomputed query vector.
    pub fn search_objects_by_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| crate::error::EngineError::Lock("vector index"))?;
        Ok(guard.search(vector, k))
    }

    fn search(&self, index: &Mutex<Backend>, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let Some(vector) = self.embed(query) else {
            return Ok(vec![]);
        };
        let guard = index
            .lock()
            .map_err(|_| crate::error::EngineError::Lock("vector index"))?;
        Ok(guard.search(&vector, k))
    }

    /// Drop an event's embedding from mirror and index.
    pub fn delete_event(&self, id: &str) -> Result<()> {
        self.delete_entity("event_embeddings", "event_id", &self.events, id)
    }

    /// Drop a memory object's embedding from mirror and index.
    pub fn delete_object(&self, id: &str) -> Result<()> {
        self.delete_entity("object_embeddings", "object_id", &self.objects, id)
    }

    fn delete_entity(
        &self,
        table: &str,
        key_col: &str,
        index: &Mutex<Backend>,
        id: &str,
    ) -> Result<()> {
        {
            let writer = self.db.write()?;
            writer.execute(
                &format!("DELETE FROM {table} WHERE {key_col} = ?1"),
                params![id],
            )?;
        }
        let mut guard = index
            .lock()
            .map_err(|_| crate::error::EngineError::Lock("vector index"))?;
        guard.remove(id);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
