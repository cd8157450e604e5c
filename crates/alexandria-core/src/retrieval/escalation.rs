//! Escalation Detector
//!
//! Decides when the retriever should disclose more context than the session
//! has asked for. Emits at most one signal per call, picked by confidence
//! and then by fixed priority.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::session::{DisclosureLevel, Session};

/// Why an escalation fired, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    /// The user is explicitly asking the memory system something
    ExplicitQuery,
    /// Errors are piling up in the session
    ErrorBurst,
    /// The working file moved away from the last topic
    TopicShift,
    /// Many events since the last checkpoint and no recent disclosure
    EventThreshold,
}

impl EscalationReason {
    fn priority(&self) -> u8 {
        match self {
            EscalationReason::ExplicitQuery => 3,
            EscalationReason::ErrorBurst => 2,
            EscalationReason::TopicShift => 1,
            EscalationReason::EventThreshold => 0,
        }
    }
}

/// A typed instruction to disclose more context.
#[derive(Debug, Clone)]
pub struct EscalationSignal {
    pub reason: EscalationReason,
    pub level: DisclosureLevel,
    pub confidence: f32,
    pub detail: String,
}

/// Error count at which a burst starts escalating.
pub const ERROR_BURST_MIN: i64 = 3;

/// Error count at which burst confidence saturates.
pub const ERROR_BURST_MAX: i64 = 5;

/// Events since checkpoint that trip the threshold signal.
pub const EVENT_THRESHOLD: i64 = 15;

/// Minimum seconds between threshold-driven disclosures.
pub const DISCLOSURE_COOLDOWN_SECS: i64 = 60;

/// Sessions with this many events or more count as long.
pub const LONG_SESSION_EVENTS: i64 = 50;

static EXPLICIT_QUERY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bremind me\b",
        r"(?i)\bwhat did we decide\b",
        r"(?i)\bwhy did we (choose|pick)\b",
        r"(?i)\bhow did we fix\b",
        r"(?i)\bany conventions\b",
        r"(?i)\bany constraints\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("explicit query pattern"))
    .collect()
});

/// Evaluate all escalation signals and return the strongest, if any.
pub fn detect_escalation(
    session: &Session,
    query: Option<&str>,
    current_file: Option<&str>,
    now: DateTime<Utc>,
) -> Option<EscalationSignal> {
    let mut signals: Vec<EscalationSignal> = Vec::new();

    if let Some(query) = query {
        if EXPLICIT_QUERY_PATTERNS.iter().any(|p| p.is_match(query)) {
            signals.push(EscalationSignal {
                reason: EscalationReason::ExplicitQuery,
                level: DisclosureLevel::Deep,
                confidence: 1.0,
                detail: "user asked the memory system directly".to_string(),
            });
        }
    }

    if session.error_count >= ERROR_BURST_MIN {
        let confidence =
            (session.error_count as f32 / ERROR_BURST_MAX as f32).clamp(0.0, 1.0);
        signals.push(EscalationSignal {
            reason: EscalationReason::ErrorBurst,
            level: DisclosureLevel::Deep,
            confidence,
            detail: format!("{} errors this session", session.error_count),
        });
    }

    if let (Some(file), Some(topic)) = (current_file, session.last_topic.as_deref()) {
        if file != topic {
            signals.push(EscalationSignal {
                reason: EscalationReason::TopicShift,
                level: DisclosureLevel::Task,
                confidence: 0.6,
                detail: format!("working file moved from {topic} to {file}"),
            });
        }
    }

    let cooled_down = session
        .last_disclosure_at
        .map(|t| (now - t).num_seconds() > DISCLOSURE_COOLDOWN_SECS)
        .unwrap_or(true);
    if session.events_since_checkpoint >= EVENT_THRESHOLD && cooled_down {
        let level = if session.events_count >= LONG_SESSION_EVENTS {
            DisclosureLevel::Deep
        } else {
            DisclosureLevel::Task
        };
        signals.push(EscalationSignal {
            reason: EscalationReason::EventThreshold,
            level,
            confidence: 0.5,
            detail: format!(
                "{} events since last checkpoint",
                session.events_since_checkpoint
            ),
        });
    }

    signals.into_iter().max_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.reason.priority().cmp(&b.reason.priority()))
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> Session {
        let now = Utc::now();
        Session {
            id: "s1".into(),
            started_at: now,
            ended_at: None,
            working_directory: None,
            working_file: None,
            working_task: None,
            summary: None,
            events_count: 0,
            objects_created: 0,
            objects_accessed: 0,
            last_checkpoint_at: None,
            events_since_checkpoint: 0,
            injected_memory_ids: vec![],
            last_disclosure_at: None,
            error_count: 0,
            disclosure_level: DisclosureLevel::Minimal,
            last_topic: None,
        }
    }

    #[test]
    fn test_quiet_session_emits_nothing() {
        assert!(detect_escalation(&session(), None, None, Utc::now()).is_none());
    }

    #[test]
    fn test_explicit_query_wins() {
        let mut s = session();
        s.error_count = 5;
        let signal = detect_escalation(
            &s,
            Some("remind me what did we decide about retries"),
            None,
            Utc::now(),
        )
        .unwrap();
        // Both fire at confidence 1.0; priority breaks the tie
        assert_eq!(signal.reason, EscalationReason::ExplicitQuery);
        assert_eq!(signal.level, DisclosureLevel::Deep);
    }

    #[test]
    fn test_error_burst_confidence_scales() {
        let mut s = session();
        s.error_count = 3;
        let signal = detect_escalation(&s, None, None, Utc::now()).unwrap();
        assert_eq!(signal.reason, EscalationReason::ErrorBurst);
        assert!((signal.confidence - 0.6).abs() < 1e-6);

        s.error_count = 5;
        let signal = detect_escalation(&s, None, None, Utc::now()).unwrap();
        assert!((signal.confidence - 1.0).abs() < 1e-6);

        s.error_count = 9;
        let signal = detect_escalation(&s, None, None, Utc::now()).unwrap();
        assert!((signal.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_topic_shift_on_changed_file() {
        let mut s = session();
        s.last_topic = Some("src/parser.rs".into());
        let signal =
            detect_escalation(&s, None, Some("src/retriever.rs"), Utc::now()).unwrap();
        assert_eq!(signal.reason, EscalationReason::TopicShift);
        assert_eq!(signal.level, DisclosureLevel::Task);

        assert!(detect_escalation(&s, None, Some("src/parser.rs"), Utc::now()).is_none());
    }

    #[test]
    fn test_event_threshold_levels_and_cooldown() {
        let now = Utc::now();
        let mut s = session();
        s.events_since_checkpoint = 20;
        s.events_count = 20;
        let signal = detect_escalation(&s, None, None, now).unwrap();
        assert_eq!(signal.reason, EscalationReason::EventThreshold);
        assert_eq!(signal.level, DisclosureLevel::Task);

        // Long sessions escalate deeper
        s.events_count = 80;
        let signal = detect_escalation(&s, None, None, now).unwrap();
        assert_eq!(signal.level, DisclosureLevel::Deep);

        // A recent disclosure suppresses the threshold signal
        s.last_disclosure_at = Some(now - Duration::seconds(30));
        assert!(detect_escalation(&s, None, None, now).is_none());
    }
}
