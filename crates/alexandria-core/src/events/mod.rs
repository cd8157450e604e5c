//! Event Model
//!
//! Events are the append-only raw record of a session: user turns, agent
//! turns, tool outputs, diffs, errors and test summaries. Content is inlined
//! when small and offloaded to a blob when the token estimate exceeds
//! [`crate::content::INLINE_TOKEN_LIMIT`].

mod blobs;
mod log;

pub use blobs::BlobStore;
pub use log::{EventLog, NewEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of events in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A user or agent conversational turn
    #[default]
    Turn,
    /// Output of a tool invocation
    ToolOutput,
    /// A unified diff
    Diff,
    /// An error payload
    Error,
    /// A test-run summary
    TestSummary,
}

impl EventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Turn => "turn",
            EventType::ToolOutput => "tool_output",
            EventType::Diff => "diff",
            EventType::Error => "error",
            EventType::TestSummary => "test_summary",
        }
    }

    /// Parse from string name, defaulting to `turn`
    pub fn parse_name(s: &str) -> Self {
        match s {
            "tool_output" => EventType::ToolOutput,
            "diff" => EventType::Diff,
            "error" => EventType::Error,
            "test_summary" => EventType::TestSummary,
            _ => EventType::Turn,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted event. Immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,
    /// Classified type
    pub event_type: EventType,
    /// Tool that produced the event, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// File the event concerns, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Tool exit code, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Inline content; `None` when offloaded to a blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Blob id when the content was offloaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
    /// 16-hex SHA-256 prefix of the content
    pub content_hash: String,
    /// Estimated token count of the content
    pub token_count: i64,
}

impl Event {
    /// Whether the content lives in the blob store.
    pub fn is_blob_backed(&self) -> bool {
        self.blob_id.is_some()
    }
}
