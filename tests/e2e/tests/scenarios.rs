//! End-to-end scenarios: full journeys from raw events through curation to
//! retrieval, each against an isolated engine.

use std::sync::Arc;

use alexandria_core::{
    CodeRef, Confidence, ContextRequest, DisclosureLevel, MemoryFilter, MemoryInput,
    MemoryStatus, ObjectType, SearchOptions,
};
use alexandria_e2e_tests::harness::TestEngine;
use alexandria_e2e_tests::mocks::{ScriptedModel, ScriptedTruth};

/// A debugging session distills into a `known_fix` that names both the
/// error signature and what resolved it.
#[test]
fn debugging_session_produces_known_fix() {
    let t = TestEngine::new();
    let session = t.session();
    let ingestor = t.engine.ingestor();

    ingestor
        .ingest_turn(&session, "I'm getting Cannot find module './utils'")
        .unwrap();
    ingestor
        .ingest_turn(&session, "Let me check the import.")
        .unwrap();
    ingestor
        .ingest_tool_output(
            &session,
            "bash",
            "error: Cannot find module './utils'",
            Some(1),
        )
        .unwrap();
    ingestor
        .ingest_turn(
            &session,
            "No, the issue is the file extension. In Bun, you need .ts extension.",
        )
        .unwrap();
    ingestor
        .ingest_tool_output(
            &session,
            "edit",
            "Changed import from \"./utils\" to \"./utils.ts\"",
            Some(0),
        )
        .unwrap();
    ingestor
        .ingest_tool_output(&session, "bash", "5 tests passed\n0 tests failed", Some(0))
        .unwrap();

    ingestor.trigger_checkpoint(&session).unwrap();

    let memories = t
        .engine
        .memories()
        .list(&MemoryFilter {
            object_types: Some(vec![ObjectType::KnownFix]),
            ..Default::default()
        })
        .unwrap();
    assert!(!memories.is_empty(), "expected at least one known_fix");
    let fix = &memories[0];
    assert!(fix.content.contains("Cannot find module './utils'"));
    assert!(fix.content.to_lowercase().contains("extension"));

    let all = t.engine.memories().list(&MemoryFilter::default()).unwrap();
    assert!(all.iter().all(|m| !m.content.contains("Let me check")));
}

/// Pure meta-commentary never becomes memory.
#[test]
fn noise_rejection_creates_nothing() {
    let t = TestEngine::new();
    let session = t.session();
    let ingestor = t.engine.ingestor();

    for content in [
        "Let me check the file structure first.",
        "I see. Now let me look at the implementation.",
        "Looking at the tests next to get oriented.",
        "Let me run the linter over the whole tree.",
        "I'll start with the configuration module.",
    ] {
        ingestor.ingest_turn(&session, content).unwrap();
    }

    let outcome = ingestor.trigger_checkpoint(&session).unwrap();
    assert_eq!(outcome.memories_created, 0);
    assert!(t.engine.memories().list(&MemoryFilter::default()).unwrap().is_empty());
}

/// Identical content is persisted twice (the log is append-only) but the
/// curator counts it once.
#[test]
fn content_hash_dedup() {
    let t = TestEngine::new();
    let session = t.session();
    let ingestor = t.engine.ingestor();

    let correction = "Never use default exports in this code base, they break tree shaking.";
    let first = ingestor.ingest_turn(&session, correction).unwrap();
    let second = ingestor.ingest_turn(&session, correction).unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate, "hash exists after the first append");
    assert_eq!(t.engine.events().count().unwrap(), 2);

    ingestor.trigger_checkpoint(&session).unwrap();

    let constraints = t
        .engine
        .memories()
        .list(&MemoryFilter {
            object_types: Some(vec![ObjectType::Constraint]),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(constraints.len(), 1);
    // One evidence event: the duplicate contributed nothing
    assert_eq!(constraints[0].evidence_event_ids.len(), 1);
}

/// A stronger duplicate candidate supersedes the existing memory, and the
/// superseded row disappears from search.
#[test]
fn supersession_via_gated_duplicate() {
    let content = "Use tabs for indentation across every source file";
    let model = ScriptedModel::new(format!(
        "{{\"memories\": [{{\"type\": \"preference\", \"content\": \"{content}\", \
         \"reasoning\": \"stated twice\", \"confidence\": \"high\"}}]}}"
    ));
    let t = TestEngine::gated(Arc::new(model));
    let session = t.session();

    // Existing weaker memory A
    let mut a = MemoryInput::new(ObjectType::Preference, content);
    a.confidence = Confidence::Medium;
    a.evidence_event_ids = vec!["e1".into()];
    let a = t.engine.memories().create(a).unwrap();

    // Candidate B arrives through a gated checkpoint
    t.engine
        .ingestor()
        .ingest_turn(&session, "Reminder that we settled the indentation question already.")
        .unwrap();
    let outcome = t.engine.ingestor().trigger_checkpoint(&session).unwrap();
    assert!(outcome.conflicts_detected >= 1);
    assert_eq!(outcome.memories_created, 1);

    let a = t.engine.memories().require(&a.id).unwrap();
    assert_eq!(a.status, MemoryStatus::Superseded);
    let b_id = a.superseded_by.clone().expect("superseded_by set");
    let b = t.engine.memories().require(&b_id).unwrap();
    assert_eq!(b.status, MemoryStatus::Active);

    let results = t
        .engine
        .retriever()
        .search("tabs indentation", &SearchOptions::default())
        .unwrap();
    assert_eq!(results[0].memory.id, b_id);
    assert!(results.iter().all(|r| r.memory.id != a.id));
}

/// A memory whose referenced symbol vanished goes stale but still surfaces
/// in task-level context packs.
#[test]
fn staleness_keeps_memory_queryable() {
    let truth = ScriptedTruth::new("c7").with_file("src/retriever/hybrid-search.ts");
    let t = TestEngine::with_truth(Arc::new(truth));

    let mut input = MemoryInput::new(
        ObjectType::Decision,
        "HybridSearch owns the fusion weighting between lexical and vector scores",
    );
    input.code_refs = vec![CodeRef::symbol(
        "src/retriever/hybrid-search.ts",
        "HybridSearch",
    )];
    let m = t.engine.memories().create(input).unwrap();

    let report = t.engine.staleness().unwrap().check_all().unwrap();
    assert_eq!(report.marked_stale, 1);
    assert_eq!(
        t.engine.memories().require(&m.id).unwrap().status,
        MemoryStatus::Stale
    );

    let pack = t
        .engine
        .retriever()
        .get_context(&ContextRequest {
            level: DisclosureLevel::Task,
            query: Some("hybrid search fusion weighting".into()),
            ..Default::default()
        })
        .unwrap();
    assert!(pack.objects.iter().any(|o| o.id == m.id));

    // Filtering to active memories hides it
    let results = t
        .engine
        .retriever()
        .search("hybrid search fusion", &SearchOptions::default())
        .unwrap();
    assert!(results.iter().all(|r| r.memory.id != m.id));
}

/// Context packs fill in rank order and stop before overflowing the budget.
#[test]
fn context_pack_respects_budget() {
    let t = TestEngine::new();
    for i in 0..10 {
        t.engine
            .memories()
            .create(MemoryInput::new(
                ObjectType::Constraint,
                format!(
                    "Constraint {i}: {}",
                    "never skip the deadline check in request handling paths ".repeat(8)
                ),
            ))
            .unwrap();
    }

    let pack = t
        .engine
        .retriever()
        .get_context(&ContextRequest {
            level: DisclosureLevel::Task,
            token_budget: Some(600),
            ..Default::default()
        })
        .unwrap();

    assert!(pack.metadata.tokens_used <= 600);
    assert!(pack.objects.len() < 10);
    assert!(!pack.objects.is_empty());
    assert_eq!(pack.total_count, 10);
    assert_eq!(pack.metadata.token_budget, 600);
}
