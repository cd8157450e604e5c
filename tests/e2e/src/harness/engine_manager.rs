//! Test Engine Manager
//!
//! Isolated engine instances over temporary databases. Each test gets its
//! own file; the directory is deleted when the manager drops.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use alexandria_core::{
    CodeTruth, CurationTier, Embedder, Engine, EngineOptions, LanguageModel,
};

use crate::mocks::HashEmbedder;

/// An engine over a throwaway database.
pub struct TestEngine {
    pub engine: Engine,
    /// Kept alive so the database directory survives the test
    _temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl TestEngine {
    /// Default test engine: deterministic embedder, rule-tier curation,
    /// no model, no code truth.
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Build with customized options. The closure receives the defaults
    /// (temp path + hash embedder) and may override anything.
    pub fn with(customize: impl FnOnce(&mut EngineOptions)) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let db_path = temp_dir.path().join("alexandria.db");
        let mut options = EngineOptions {
            db_path: Some(db_path.clone()),
            embedder: Some(Arc::new(HashEmbedder)),
            ..Default::default()
        };
        customize(&mut options);
        let engine = Engine::open(options).expect("open engine");
        Self {
            engine,
            _temp_dir: temp_dir,
            db_path,
        }
    }

    /// Gated tier with a scripted model.
    pub fn gated(model: Arc<dyn LanguageModel>) -> Self {
        Self::with(|options| {
            options.tier = CurationTier::Gated;
            options.model = Some(model);
        })
    }

    /// With a scripted code-truth bridge.
    pub fn with_truth(truth: Arc<dyn CodeTruth>) -> Self {
        Self::with(|options| {
            options.truth = Some(truth);
        })
    }

    /// Without any embedder, for degraded-mode tests.
    pub fn without_embedder() -> Self {
        Self::with(|options| {
            options.embedder = None;
        })
    }

    /// Swap in a different embedder.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self::with(|options| {
            options.embedder = Some(embedder);
        })
    }

    /// A fresh session id for this test.
    pub fn session(&self) -> String {
        format!("session-{}", uuid::Uuid::new_v4())
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
