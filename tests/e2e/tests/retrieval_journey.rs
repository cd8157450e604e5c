//! Retrieval journeys: feedback loops, escalation, intent routing and
//! engine statistics over a populated database.

use alexandria_core::{
    detect_escalation, ContextRequest, DisclosureLevel, EscalationReason, MemoryInput,
    ObjectType, OutcomeKind, SearchOptions,
};
use alexandria_e2e_tests::harness::TestEngine;
use chrono::Utc;

/// Feedback shifts ranking: repeated unhelpful outcomes sink a memory below
/// an otherwise comparable sibling.
#[test]
fn outcome_feedback_reorders_results() {
    let t = TestEngine::new();
    let good = t
        .engine
        .memories()
        .create(MemoryInput::new(
            ObjectType::KnownFix,
            "Fix for \"socket hang up\": raise the keepalive timeout in the proxy",
        ))
        .unwrap();
    let bad = t
        .engine
        .memories()
        .create(MemoryInput::new(
            ObjectType::KnownFix,
            "Fix for \"socket hang up\": raise the retry count in the proxy layer",
        ))
        .unwrap();

    for _ in 0..3 {
        t.engine
            .outcomes()
            .record(&good.id, "s1", OutcomeKind::Helpful, None)
            .unwrap();
        t.engine
            .outcomes()
            .record(&bad.id, "s1", OutcomeKind::Unhelpful, None)
            .unwrap();
    }

    let results = t
        .engine
        .retriever()
        .search("socket hang up proxy", &SearchOptions::default())
        .unwrap();
    let good_pos = results.iter().position(|r| r.memory.id == good.id).unwrap();
    let bad_pos = results.iter().position(|r| r.memory.id == bad.id).unwrap();
    assert!(good_pos < bad_pos);
}

/// A session accumulating errors escalates to a deep disclosure, and the
/// disclosure resets the burst counter.
#[test]
fn error_burst_escalation_roundtrip() {
    let t = TestEngine::new();
    let session = t.session();
    let ingestor = t.engine.ingestor();

    t.engine
        .memories()
        .create(MemoryInput::new(
            ObjectType::Constraint,
            "Always check the connection pool size before blaming the database",
        ))
        .unwrap();

    for i in 0..4 {
        ingestor
            .ingest_error(&session, &format!("error: connection refused attempt {i}"))
            .unwrap();
    }

    let s = t.engine.sessions().require(&session).unwrap();
    assert_eq!(s.error_count, 4);

    let signal = detect_escalation(&s, None, None, Utc::now()).expect("burst escalates");
    assert_eq!(signal.reason, EscalationReason::ErrorBurst);
    assert_eq!(signal.level, DisclosureLevel::Deep);

    let pack = t
        .engine
        .retriever()
        .get_context(&ContextRequest {
            level: signal.level,
            query: Some("connection refused".into()),
            session_id: Some(session.clone()),
            escalation: Some(signal.reason),
            ..Default::default()
        })
        .unwrap();
    assert!(!pack.objects.is_empty());

    let s = t.engine.sessions().require(&session).unwrap();
    assert_eq!(s.error_count, 0);
    assert_eq!(s.disclosure_level, DisclosureLevel::Deep);
    assert!(!s.injected_memory_ids.is_empty());
}

/// Explicit memory questions escalate deepest regardless of other signals.
#[test]
fn explicit_query_escalates_deep() {
    let t = TestEngine::new();
    let session = t.session();
    t.engine.sessions().get_or_create(&session).unwrap();
    let s = t.engine.sessions().require(&session).unwrap();

    let signal = detect_escalation(
        &s,
        Some("remind me how did we fix the flaky login test"),
        None,
        Utc::now(),
    )
    .expect("explicit query escalates");
    assert_eq!(signal.reason, EscalationReason::ExplicitQuery);
    assert_eq!(signal.level, DisclosureLevel::Deep);
}

/// Debugging queries favor fixes over unrelated environment facts.
#[test]
fn debugging_intent_prioritizes_known_fixes() {
    let t = TestEngine::new();
    let fix = t
        .engine
        .memories()
        .create(MemoryInput::new(
            ObjectType::KnownFix,
            "Fix for \"migration checksum mismatch\": regenerate the lock table",
        ))
        .unwrap();
    t.engine
        .memories()
        .create(MemoryInput::new(
            ObjectType::Environment,
            "Migration files live under db/migrations with checksum suffixes",
        ))
        .unwrap();

    let results = t
        .engine
        .retriever()
        .search("migration checksum mismatch error", &SearchOptions::default())
        .unwrap();
    assert_eq!(results[0].memory.id, fix.id);
}

/// Stats reflect the full pipeline after a busy session.
#[test]
fn stats_track_pipeline_activity() {
    let t = TestEngine::new();
    let session = t.session();
    let ingestor = t.engine.ingestor();

    ingestor
        .ingest_turn(&session, "Never push straight to the release branch, open a PR.")
        .unwrap();
    ingestor
        .ingest_turn(&session, &"oversized payload ".repeat(400))
        .unwrap();
    ingestor.trigger_checkpoint(&session).unwrap();

    let stats = t.engine.stats().unwrap();
    assert_eq!(stats.events, 2);
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.blobs, 1);
    assert_eq!(stats.memories_active, 1);
    assert_eq!(stats.conflicts_pending, 0);
}

/// Without an embedder the engine still answers lexically.
#[test]
fn lexical_only_degradation() {
    let t = TestEngine::without_embedder();
    t.engine
        .memories()
        .create(MemoryInput::new(
            ObjectType::Environment,
            "The staging cluster runs kubernetes 1.31 on spot instances",
        ))
        .unwrap();
    let results = t
        .engine
        .retriever()
        .search("staging kubernetes cluster", &SearchOptions::default())
        .unwrap();
    assert!(!results.is_empty());
    assert!(results[0].vector_score.is_none());
}
