//! ============================================================================
//! Memory Types - Data structures for long-term memory
//! ============================================================================
//! Defines user summaries, conversation records, recall results and the
//! error taxonomy shared by every memory component.
//! ============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters kept from each side of an exchange in its document
pub const SNIPPET_CHARS: usize = 200;

/// All stored user summaries, keyed by user id
pub type UserSummaries = HashMap<String, UserSummary>;

/// Evolving free-text profile of a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    /// Platform user identifier
    pub user_id: String,
    /// Latest summary produced by the summarizer
    pub summary_text: String,
    /// When the summary was last replaced
    pub last_updated: DateTime<Utc>,
}

impl UserSummary {
    pub fn new(user_id: String, summary_text: String) -> Self {
        Self {
            user_id,
            summary_text,
            last_updated: Utc::now(),
        }
    }
}

/// One stored prompt/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique identifier for this record
    pub id: String,
    /// When the exchange happened
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    /// Channel the exchange took place in
    pub channel_id: String,
    /// Author of the prompt (empty for records written by older versions)
    #[serde(default)]
    pub author_id: String,
    /// The user's message
    #[serde(alias = "document")]
    pub prompt_text: String,
    /// The bot's reply
    #[serde(default)]
    pub response_text: String,
    /// Model-written description of the exchange, used as its document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_summary: Option<String>,
    /// Embedding of [`ConversationRecord::document`]; `None` when the
    /// embedding call failed, which excludes the record from recall
    #[serde(default, alias = "embedding")]
    pub embedding_vector: Option<Vec<f32>>,
}

impl ConversationRecord {
    /// Create a new record without an embedding
    pub fn new(channel_id: String, author_id: String, prompt_text: String, response_text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            channel_id,
            author_id,
            prompt_text,
            response_text,
            exchange_summary: None,
            embedding_vector: None,
        }
    }

    /// Attach a pre-computed embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding_vector = Some(embedding);
        self
    }

    /// Whether this record takes part in similarity search
    pub fn has_embedding(&self) -> bool {
        self.embedding_vector.is_some()
    }

    /// Text representation used both for embedding and for prompt context.
    /// The exchange summary when there is one, else both sides capped at
    /// [`SNIPPET_CHARS`] characters each.
    pub fn document(&self) -> String {
        if let Some(summary) = &self.exchange_summary {
            return summary.clone();
        }
        if self.response_text.is_empty() {
            return clip(&self.prompt_text, SNIPPET_CHARS).to_string();
        }
        format!(
            "user: {}\nassistant: {}",
            clip(&self.prompt_text, SNIPPET_CHARS),
            clip(&self.response_text, SNIPPET_CHARS)
        )
    }
}

/// Longest prefix of `text` holding at most `max` characters
pub(crate) fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// A recalled record together with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredConversation {
    pub record: ConversationRecord,
    pub similarity: f32,
}

/// Result of a probabilistic summary update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The summary was regenerated and stored
    Updated(UserSummary),
    /// Nothing was called and nothing changed
    NoOp,
}

impl UpdateOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated(_))
    }
}

/// Snapshot counters for inspection tooling
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub enabled: bool,
    pub memory_dir: Option<PathBuf>,
    pub user_summaries: usize,
    pub conversations: usize,
    pub embedded_conversations: usize,
    pub embedding_dim: Option<usize>,
    pub max_stored_conversations: usize,
}

/// Error conditions of the memory subsystem.
/// None of them is fatal to the host: callers degrade the affected feature.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Summarization unavailable: {0}")]
    SummarizationUnavailable(String),

    #[error("Corrupt memory file {path}: {reason}")]
    StorageReadCorrupt { path: PathBuf, reason: String },

    #[error("Failed to write memory file {path}: {reason}")]
    StorageWriteFailed { path: PathBuf, reason: String },

    #[error("Invalid memory configuration: {0}")]
    InvalidConfig(String),
}

/// Timestamp parsing that also accepts the naive ISO-8601 strings written by
/// the earlier bot (no offset, local clock assumed to be UTC).
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
