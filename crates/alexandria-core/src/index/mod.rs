//! Indexes
//!
//! Three retrieval surfaces over the primary tables:
//! - FTS5 mirrors for lexical search (BM25, porter stemming)
//! - an exact-token index over memory content
//! - a vector index fed by a pluggable embedder

mod fts;
mod tokens;
mod vector;

pub use fts::{sanitize_match_query, FtsHit, FtsIndex};
pub use tokens::{extract_tokens, ExtractedToken, TokenIndex, TokenType};
pub use vector::{
    cosine_similarity, EmbedError, Embedder, Embedding, VectorStore, EMBEDDING_DIMENSIONS,
};
