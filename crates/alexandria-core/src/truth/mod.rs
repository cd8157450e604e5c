//! Code-Truth Bridge
//!
//! Resolves code refs against the current working tree through the
//! [`CodeTruth`] capability trait (implemented outside the core, typically
//! over git) and computes memory staleness from the result.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::memory::{CodeRef, MemoryFilter, MemoryStatus, MemoryStore, RefType};

/// The current state of the code base as the core sees it.
pub trait CodeTruth: Send + Sync {
    fn git_root(&self) -> Option<PathBuf>;
    fn current_commit(&self) -> Option<String>;
    fn changed_files_since(&self, commit: &str) -> Vec<String>;
    fn file_exists(&self, path: &str) -> bool;
    fn symbol_exists(&self, path: &str, name: &str) -> bool;
    fn hash_file(&self, path: &str) -> Option<String>;
    fn hash_line_range(&self, path: &str, start: i64, end: i64) -> Option<String>;
}

/// Per-ref verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    /// Matches the current commit or content
    Verified,
    /// Content moved; the anchor no longer matches but the target exists
    NeedsReview,
    /// The target is gone
    Stale,
}

/// Classify one code ref against the current tree.
pub fn classify_ref(truth: &dyn CodeTruth, r: &CodeRef) -> RefState {
    let current_commit = truth.current_commit();

    match r.ref_type {
        RefType::File => {
            if r.verified_at_commit.is_some() && r.verified_at_commit == current_commit {
                return RefState::Verified;
            }
            if !truth.file_exists(&r.path) {
                return RefState::Stale;
            }
            match (&r.content_hash, truth.hash_file(&r.path)) {
                (Some(stored), Some(current)) if *stored == current => RefState::Verified,
                _ => RefState::NeedsReview,
            }
        }
        RefType::Symbol => {
            let name = r.symbol.as_deref().unwrap_or("");
            if truth.symbol_exists(&r.path, name) {
                RefState::Verified
            } else {
                RefState::Stale
            }
        }
        RefType::LineRange => {
            if r.verified_at_commit.is_some() && r.verified_at_commit == current_commit {
                return RefState::Verified;
            }
            if !truth.file_exists(&r.path) {
                return RefState::Stale;
            }
            let current = match (r.line_start, r.line_end) {
                (Some(start), Some(end)) => truth.hash_line_range(&r.path, start, end),
                _ => None,
            };
            match (&r.content_hash, current) {
                (Some(stored), Some(hash)) if *stored == hash => RefState::Verified,
                _ => RefState::NeedsReview,
            }
        }
    }
}

/// Summary of one staleness pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    pub checked: usize,
    pub verified: usize,
    pub marked_stale: usize,
    pub needs_review: usize,
}

/// Checks every referenced memory against the current tree.
pub struct StalenessChecker {
    truth: Arc<dyn CodeTruth>,
    store: Arc<MemoryStore>,
}

impl StalenessChecker {
    pub fn new(truth: Arc<dyn CodeTruth>, store: Arc<MemoryStore>) -> Self {
        Self { truth, store }
    }

    /// Check all active and stale memories that carry code refs.
    ///
    /// Any stale ref marks the memory stale. All-verified refs refresh
    /// `last_verified_at` and re-anchor the refs at the current commit; a
    /// stale memory whose refs all verify returns to active.
    pub fn check_all(&self) -> Result<StalenessReport> {
        let mut report = StalenessReport::default();
        let memories = self.store.list(&MemoryFilter {
            statuses: vec![MemoryStatus::Active, MemoryStatus::Stale],
            limit: 10_000,
            ..Default::default()
        })?;

        for memory in memories {
            if memory.code_refs.is_empty() {
                continue;
            }
            report.checked += 1;

            let states: Vec<RefState> = memory
                .code_refs
                .iter()
                .map(|r| classify_ref(self.truth.as_ref(), r))
                .collect();

            if states.contains(&RefState::Stale) {
                if memory.status == MemoryStatus::Active {
                    self.store.mark_stale(&memory.id)?;
                }
                report.marked_stale += 1;
            } else if states.iter().all(|s| *s == RefState::Verified) {
                let commit = self.truth.current_commit();
                let refs: Vec<CodeRef> = memory
                    .code_refs
                    .iter()
                    .cloned()
                    .map(|mut r| {
                        r.verified_at_commit = commit.clone();
                        r
                    })
                    .collect();
                if memory.status == MemoryStatus::Stale {
                    self.store.verify(&memory.id)?;
                }
                self.store.stamp_verified(&memory.id, &refs)?;
                report.verified += 1;
            } else {
                report.needs_review += 1;
            }
        }

        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorStore;
    use crate::memory::{ConfidenceTier, MemoryInput, ObjectType};
    use crate::storage::Database;
    use std::collections::HashSet;

    /// A scripted code base: existing files, known symbols, fixed hashes.
    pub struct FakeTruth {
        pub commit: String,
        pub files: HashSet<String>,
        pub symbols: HashSet<(String, String)>,
    }

    impl FakeTruth {
        fn new(commit: &str) -> Self {
            Self {
                commit: commit.to_string(),
                files: HashSet::new(),
                symbols: HashSet::new(),
            }
        }
    }

    impl CodeTruth for FakeTruth {
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
            self.files
                .contains(path)
                .then(|| format!("hash:{path}"))
        }
        fn hash_line_range(&self, path: &str, start: i64, end: i64) -> Option<String> {
            self.files
                .contains(path)
                .then(|| format!("hash:{path}:{start}:{end}"))
        }
    }

    fn setup(truth: FakeTruth) -> (tempfile::TempDir, Arc<MemoryStore>, StalenessChecker) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("alexandria.db")).unwrap());
        let vectors = Arc::new(VectorStore::new(db.clone(), None).unwrap());
        let store = Arc::new(MemoryStore::new(db, vectors));
        let checker = StalenessChecker::new(Arc::new(truth), store.clone());
        (dir, store, checker)
    }

    #[test]
    fn test_missing_symbol_marks_stale() {
        let mut truth = FakeTruth::new("c1");
        truth.files.insert("src/retriever/hybrid-search.ts".into());
        let (_dir, store, checker) = setup(truth);

        let mut input = MemoryInput::new(
            ObjectType::Decision,
            "HybridSearch owns the fusion weighting logic",
        );
        input.code_refs = vec![CodeRef::symbol(
            "src/retriever/hybrid-search.ts",
            "HybridSearch",
        )];
        let m = store.create(input).unwrap();

        let report = checker.check_all().unwrap();
        assert_eq!(report.marked_stale, 1);
        let m = store.require(&m.id).unwrap();
        assert_eq!(m.status, MemoryStatus::Stale);
    }

    #[test]
    fn test_verified_refs_refresh_timestamp_and_ground() {
        let mut truth = FakeTruth::new("c1");
        truth.files.insert("src/app.ts".into());
        truth
            .symbols
            .insert(("src/app.ts".into(), "createApp".into()));
        let (_dir, store, checker) = setup(truth);

        let mut input = MemoryInput::new(ObjectType::Convention, "createApp wires all middleware");
        input.code_refs = vec![CodeRef::symbol("src/app.ts", "createApp")];
        let m = store.create(input).unwrap();
        assert!(m.last_verified_at.is_none());

        let report = checker.check_all().unwrap();
        assert_eq!(report.verified, 1);

        let m = store.require(&m.id).unwrap();
        assert!(m.last_verified_at.is_some());
        assert_eq!(m.code_refs[0].verified_at_commit.as_deref(), Some("c1"));
        assert_eq!(m.confidence_tier, ConfidenceTier::Grounded);
    }

    #[test]
    fn test_stale_memory_recovers_when_refs_verify() {
        let mut truth = FakeTruth::new("c2");
        truth.files.insert("src/app.ts".into());
        truth
            .symbols
            .insert(("src/app.ts".into(), "createApp".into()));
        let (_dir, store, checker) = setup(truth);

        let mut input = MemoryInput::new(ObjectType::Convention, "createApp wires all middleware");
        input.code_refs = vec![CodeRef::symbol("src/app.ts", "createApp")];
        let m = store.create(input).unwrap();
        store.mark_stale(&m.id).unwrap();

        checker.check_all().unwrap();
        let m = store.require(&m.id).unwrap();
        assert_eq!(m.status, MemoryStatus::Active);
    }

    #[test]
    fn test_moved_file_content_needs_review() {
        let mut truth = FakeTruth::new("c3");
        truth.files.insert("src/config.ts".into());
        let (_dir, store, checker) = setup(truth);

        let mut input = MemoryInput::new(ObjectType::Environment, "config defaults live in src/config.ts");
        let mut r = CodeRef::file("src/config.ts");
        // Anchored at an older commit with a hash that no longer matches
        r.verified_at_commit = Some("old".into());
        r.content_hash = Some("stale-hash".into());
        input.code_refs = vec![r];
        let m = store.create(input).unwrap();

        let report = checker.check_all().unwrap();
        assert_eq!(report.needs_review, 1);
        let m = store.require(&m.id).unwrap();
        // Not stale, not re-verified either
        assert_eq!(m.status, MemoryStatus::Active);
        assert!(m.last_verified_at.is_none());
    }

    #[test]
    fn test_memories_without_refs_are_skipped() {
        let truth = FakeTruth::new("c1");
        let (_dir, store, checker) = setup(truth);
        store
            .create(MemoryInput::new(ObjectType::Preference, "Use tabs for indentation"))
            .unwrap();
        let report = checker.check_all().unwrap();
        assert_eq!(report, StalenessReport::default());
    }
}
