//! Capability Mocks
//!
//! Deterministic stand-ins for the three injected capabilities: an embedder
//! that hashes words into buckets, a language model that replays a canned
//! response, and a code-truth bridge over scripted files and symbols.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use alexandria_core::{
    CodeTruth, EmbedError, Embedder, LanguageModel, LlmError, EMBEDDING_DIMENSIONS,
};

/// Deterministic bag-of-words embedder. Similar texts get similar vectors;
/// no model runtime involved.
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = vec![0.0f32; EMBEDDING_DIMENSIONS];
        for word in text.to_lowercase().split_whitespace() {
            let mut h: usize = 5381;
            for b in word.bytes() {
                h = h.wrapping_mul(33).wrapping_add(b as usize);
            }
            v[h % EMBEDDING_DIMENSIONS] += 1.0;
        }
        Ok(v)
    }
}

/// Replays a fixed completion and records the prompts it saw.
pub struct ScriptedModel {
    response: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A model that always fails, for degraded-mode tests.
    pub fn down() -> DownModel {
        DownModel
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().expect("prompt log").push(prompt.to_string());
        Ok(self.response.clone())
    }
}

/// A language model that is always unreachable.
pub struct DownModel;

impl LanguageModel for DownModel {
    fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Request("connection refused".into()))
    }
}

/// Scripted working tree: a commit id plus the files and symbols that exist.
pub struct ScriptedTruth {
    pub commit: String,
    pub files: HashSet<String>,
    pub symbols: HashSet<(String, String)>,
}

impl ScriptedTruth {
    pub fn new(commit: &str) -> Self {
        Self {
            commit: commit.to_string(),
            files: HashSet::new(),
            symbols: HashSet::new(),
        }
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.files.insert(path.to_string());
        self
    }

    pub fn with_symbol(mut self, path: &str, name: &str) -> Self {
        self.files.insert(path.to_string());
        self.symbols.insert((path.to_string(), name.to_string()));
        self
    }
}

impl CodeTruth for ScriptedTruth {
    fn git_root(&self) -> Option<PathBuf> {
        Some(PathBuf::from("/repo"))
    }
    fn current_commit(&self) -> Option<String> {
        Some(self.commit.clone())
    }
    fn changed_files_since(&self, _commit: &str) -> Vec<String> {
        vec![]
    }
    fn file_exists(&self, path: &str) -> bool {
        self.files.contains(path)
    }
    fn symbol_exists(&self, path: &str, name: &str) -> bool {
        self.symbols.contains(&(path.to_string(), name.to_string()))
    }
    fn hash_file(&self, path: &str) -> Option<String> {
        self.files.contains(path).then(|| format!("hash:{path}"))
    }
    fn hash_line_range(&self, path: &str, start: i64, end: i64) -> Option<String> {
        self.files
            .contains(path)
            .then(|| format!("hash:{path}:{start}:{end}"))
    }
}
