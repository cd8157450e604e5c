//! Checkpoint Engine
//!
//! Buffers events per session, watches for episodic boundaries and runs the
//! curate-apply-reset loop when one fires. There is no mid-checkpoint
//! cancellation; triggers are only evaluated between events.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex};

use crate::conflict::{self, Conflict, ConflictKind, ConflictQueue, Resolution};
use crate::content::jaccard;
use crate::curate::{
    episode_code_refs, merge_candidates, Candidate, CurationTier, Episode, EpisodeEvent,
    Extractor, LlmCurator, RuleCurator,
};
use crate::error::{EngineError, Result};
use crate::events::EventType;
use crate::index::FtsIndex;
use crate::memory::{MemoryInput, MemoryStatus, MemoryStore, ReviewStatus};
use crate::session::SessionStore;

/// Environment knob for the window-pressure threshold.
pub const AUTO_CHECKPOINT_ENV: &str = "ALEXANDRIA_AUTO_CHECKPOINT_THRESHOLD";

static TASK_COMPLETE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\btests?\s+(?:are\s+)?(?:passing|passed|pass)\b",
        r"(?i)\b(?:done|finished|complete|ready)\b",
        r"(?i)\bsuccessfully\s+(?:built|compiled|deployed)\b",
        r"(?i)\ball\s+(?:tests|checks)\s+passed\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("task complete pattern"))
    .collect()
});

static TEST_TOOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)test|spec").expect("test tool pattern"));

/// Why a checkpoint fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Manual,
    WindowPressure,
    TaskComplete,
    TopicShift,
    ToolBurst,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::WindowPressure => "window_pressure",
            TriggerKind::TaskComplete => "task_complete",
            TriggerKind::TopicShift => "topic_shift",
            TriggerKind::ToolBurst => "tool_burst",
        }
    }
}

/// A fired trigger with its reason
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub reason: String,
}

/// Tunables for trigger detection.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Non-manual triggers no-op below this buffer size
    pub min_events: usize,
    /// Tool outputs within the burst window that fire `tool_burst`
    pub tool_burst_count: usize,
    /// Burst window in milliseconds
    pub tool_burst_window_ms: i64,
    /// Buffer size that fires `window_pressure`
    pub window_pressure_threshold: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            min_events: 5,
            tool_burst_count: 10,
            tool_burst_window_ms: 120_000,
            window_pressure_threshold: 50,
        }
    }
}

impl CheckpointConfig {
    /// Defaults with the window-pressure threshold taken from the
    /// environment when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(AUTO_CHECKPOINT_ENV) {
            if let Ok(threshold) = raw.parse::<usize>() {
                if threshold > 0 {
                    config.window_pressure_threshold = threshold;
                }
            }
        }
        config
    }
}

/// Counts reported by one checkpoint execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub episode_event_count: usize,
    pub candidates_extracted: usize,
    pub memories_created: usize,
    pub memories_updated: usize,
    pub conflicts_detected: usize,
    pub conflicts_pending: usize,
    /// Auto-approved creations, immediately eligible for injection
    pub rehydration_ready: usize,
}

/// The episodic boundary detector and curate-apply-reset loop.
pub struct CheckpointEngine {
    config: CheckpointConfig,
    tier: CurationTier,
    buffer: Mutex<Vec<EpisodeEvent>>,
    last_checkpoint: Mutex<DateTime<Utc>>,
    store: Arc<MemoryStore>,
    fts: Arc<FtsIndex>,
    sessions: Arc<SessionStore>,
    queue: Arc<ConflictQueue>,
    rules: RuleCurator,
    llm: Option<LlmCurator>,
}

impl CheckpointEngine {
    pub fn new(
        config: CheckpointConfig,
        tier: CurationTier,
        store: Arc<MemoryStore>,
        fts: Arc<FtsIndex>,
        sessions: Arc<SessionStore>,
        queue: Arc<ConflictQueue>,
        llm: Option<LlmCurator>,
    ) -> Self {
        Self {
            config,
            tier,
            buffer: Mutex::new(Vec::new()),
            last_checkpoint: Mutex::new(Utc::now()),
            store,
            fts,
            sessions,
            queue,
            rules: RuleCurator::new(),
            llm,
        }
    }

    /// Current buffer size.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Push an event into the buffer, then run a checkpoint if a trigger
    /// fires. Returns the outcome when one ran.
    pub fn add_event(
        &self,
        session_id: &str,
        event: EpisodeEvent,
    ) -> Result<Option<CheckpointOutcome>> {
        let trigger = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| EngineError::Lock("checkpoint buffer"))?;
            buffer.push(event);
            detect_trigger(&buffer, &self.config)
        };

        match trigger {
            Some(trigger) => Ok(Some(self.execute(session_id, trigger)?)),
            None => Ok(None),
        }
    }

    /// Run a manual checkpoint now, bypassing trigger detection and the
    /// minimum-buffer rule.
    pub fn checkpoint_now(&self, session_id: &str) -> Result<CheckpointOutcome> {
        self.execute(
            session_id,
            Trigger {
                kind: TriggerKind::Manual,
                reason: "manual".to_string(),
            },
        )
    }

    /// Curate the buffered episode, apply candidates, reset the buffer.
    fn execute(&self, session_id: &str, trigger: Trigger) -> Result<CheckpointOutcome> {
        let events = {
            let buffer = self
                .buffer
                .lock()
                .map_err(|_| EngineError::Lock("checkpoint buffer"))?;
            if trigger.kind != TriggerKind::Manual && buffer.len() < self.config.min_events {
                return Ok(CheckpointOutcome::default());
            }
            buffer.clone()
        };

        let episode = Episode::from_events(events);
        let mut outcome = CheckpointOutcome {
            episode_event_count: episode.len(),
            ..Default::default()
        };

        // Curate per tier; an LLM failure degrades to the rule tier
        let mut tiers = vec![self.rules.extract(&episode)?];
        if self.tier.uses_llm() {
            if let Some(llm) = &self.llm {
                tiers.push(llm.extract(&episode)?);
            }
        }
        let mut candidates = merge_candidates(tiers);
        outcome.candidates_extracted = candidates.len();

        // Attach episode-level code refs to every candidate
        let refs = episode_code_refs(&episode);
        for candidate in &mut candidates {
            if candidate.code_refs.is_empty() {
                candidate.code_refs = refs.clone();
            }
        }

        for candidate in candidates {
            if let Err(e) = self.apply_candidate(candidate, &mut outcome) {
                match e {
                    EngineError::InvalidTransition(_) => return Err(e),
                    other => tracing::warn!("candidate apply failed: {}", other),
                }
            }
        }

        {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| EngineError::Lock("checkpoint buffer"))?;
            buffer.clear();
        }
        {
            let mut last = self
                .last_checkpoint
                .lock()
                .map_err(|_| EngineError::Lock("checkpoint clock"))?;
            *last = Utc::now();
        }
        self.sessions
            .mark_checkpoint(session_id, outcome.memories_created as i64)?;

        tracing::info!(
            trigger = trigger.kind.as_str(),
            events = outcome.episode_event_count,
            created = outcome.memories_created,
            updated = outcome.memories_updated,
            conflicts = outcome.conflicts_detected,
            "checkpoint complete"
        );
        Ok(outcome)
    }

    fn apply_candidate(
        &self,
        candidate: Candidate,
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        // In the gated tier, conflict detection sees the candidate first;
        // a near-identical duplicate resolves there (replace or discard)
        if self.tier.detects_conflicts() {
            let related = self.related_memories(&candidate)?;
            let conflicts = conflict::detect(&candidate, &related);
            if !conflicts.is_empty() {
                outcome.conflicts_detected += conflicts.len();
                return self.resolve_conflicts(candidate, conflicts, outcome);
            }
        }

        // Evidence merge gate: same type + near-identical content folds the
        // candidate into the existing row
        if let Some(existing) = self
            .store
            .find_similar(candidate.object_type, &candidate.content)?
        {
            self.store.merge_evidence(
                &existing.id,
                &candidate.evidence_event_ids,
                candidate.confidence,
            )?;
            outcome.memories_updated += 1;
            return Ok(());
        }

        self.create_candidate(candidate, outcome)?;
        Ok(())
    }

    fn related_memories(
        &self,
        candidate: &Candidate,
    ) -> Result<Vec<crate::memory::MemoryObject>> {
        let hits = self.fts.search_memories(&candidate.content, 10)?;
        let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        let mut related = self.store.get_many(&ids)?;
        related.retain(|m| {
            matches!(m.status, MemoryStatus::Active | MemoryStatus::Stale)
        });
        Ok(related)
    }

    /// Apply the most severe conflict's suggested resolution. High-severity
    /// contradictions are withheld for human review instead; mechanical
    /// duplicates auto-resolve at any severity.
    fn resolve_conflicts(
        &self,
        candidate: Candidate,
        mut conflicts: Vec<Conflict>,
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        conflicts.sort_by(|a, b| b.severity.cmp(&a.severity));
        let primary = conflicts
            .iter()
            .find(|c| c.kind != ConflictKind::Ambiguity)
            .unwrap_or(&conflicts[0])
            .clone();

        if primary.kind == ConflictKind::Contradiction {
            self.queue.enqueue(&candidate, &primary)?;
            outcome.conflicts_pending += 1;
            return Ok(());
        }

        match primary.suggested {
            Resolution::KeepExisting => {}
            Resolution::Replace => {
                let new = self.create_candidate(candidate, outcome)?;
                for old_id in &primary.existing_ids {
                    self.store.supersede(old_id, &new)?;
                }
            }
            Resolution::Merge => {
                let mut merged = candidate.clone();
                if let Some(first) = primary.existing_ids.first() {
                    let existing = self.store.require(first)?;
                    if jaccard(&candidate.content, &existing.content)
                        <= conflict::MERGE_VERBATIM_SIMILARITY
                    {
                        merged.content = format!(
                            "{} [Updated from: {}]",
                            candidate.content,
                            crate::content::truncate_chars(&existing.content, 80)
                        );
                    }
                    for e in &existing.evidence_event_ids {
                        if !merged.evidence_event_ids.contains(e) {
                            merged.evidence_event_ids.push(e.clone());
                        }
                    }
                }
                let new = self.create_candidate(merged, outcome)?;
                for old_id in &primary.existing_ids {
                    self.store.supersede(old_id, &new)?;
                }
            }
            Resolution::KeepBoth => {
                self.create_candidate(candidate, outcome)?;
            }
            Resolution::RejectBoth => {
                for old_id in &primary.existing_ids {
                    self.store.retire(old_id)?;
                }
            }
        }
        Ok(())
    }

    fn create_candidate(
        &self,
        candidate: Candidate,
        outcome: &mut CheckpointOutcome,
    ) -> Result<String> {
        let input = MemoryInput {
            content: candidate.content,
            object_type: Some(candidate.object_type),
            scope: candidate.scope,
            confidence: candidate.confidence,
            evidence_event_ids: candidate.evidence_event_ids,
            evidence_excerpt: candidate.evidence_excerpt,
            code_refs: candidate.code_refs,
        };
        let memory = self.store.create(input)?;
        outcome.memories_created += 1;
        if memory.review_status == ReviewStatus::Approved {
            outcome.rehydration_ready += 1;
        }
        Ok(memory.id)
    }
}

/// Evaluate triggers in priority order over the buffered events.
pub fn detect_trigger(buffer: &[EpisodeEvent], config: &CheckpointConfig) -> Option<Trigger> {
    if let Some(t) = detect_tool_burst(buffer, config) {
        return Some(t);
    }
    if let Some(t) = detect_task_complete(buffer) {
        return Some(t);
    }
    if let Some(t) = detect_topic_shift(buffer) {
        return Some(t);
    }
    if buffer.len() >= config.window_pressure_threshold {
        return Some(Trigger {
            kind: TriggerKind::WindowPressure,
            reason: format!("buffer reached {} events", buffer.len()),
        });
    }
    None
}

fn detect_tool_burst(buffer: &[EpisodeEvent], config: &CheckpointConfig) -> Option<Trigger> {
    let newest = buffer.last()?.event.timestamp;
    let window_start = newest - Duration::milliseconds(config.tool_burst_window_ms);
    let burst = buffer
        .iter()
        .filter(|e| {
            e.event.event_type == EventType::ToolOutput && e.event.timestamp >= window_start
        })
        .count();
    (burst >= config.tool_burst_count).then(|| Trigger {
        kind: TriggerKind::ToolBurst,
        reason: format!("{burst} tool outputs in window"),
    })
}

fn detect_task_complete(buffer: &[EpisodeEvent]) -> Option<Trigger> {
    let tail = &buffer[buffer.len().saturating_sub(5)..];
    for e in tail {
        if TASK_COMPLETE_PATTERNS.iter().any(|p| p.is_match(&e.content)) {
            return Some(Trigger {
                kind: TriggerKind::TaskComplete,
                reason: "completion phrase in recent events".to_string(),
            });
        }
        if e.event.event_type == EventType::ToolOutput
            && e.event.exit_code == Some(0)
            && e.event
                .tool_name
                .as_deref()
                .is_some_and(|t| TEST_TOOL_RE.is_match(t))
        {
            return Some(Trigger {
                kind: TriggerKind::TaskComplete,
                reason: "test tool exited clean".to_string(),
            });
        }
    }
    None
}

fn detect_topic_shift(buffer: &[EpisodeEvent]) -> Option<Trigger> {
    if buffer.len() < 10 {
        return None;
    }
    let split = buffer.len() - 5;
    let recent: std::collections::HashSet<&str> = buffer[split..]
        .iter()
        .filter_map(|e| e.event.file_path.as_deref())
        .collect();
    let earlier: std::collections::HashSet<&str> = buffer[..split]
        .iter()
        .filter_map(|e| e.event.file_path.as_deref())
        .collect();
    if !recent.is_empty() && !earlier.is_empty() && recent.is_disjoint(&earlier) {
        return Some(Trigger {
            kind: TriggerKind::TopicShift,
            reason: "recent file set disjoint from earlier".to_string(),
        });
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================
