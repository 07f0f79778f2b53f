//! ============================================================================
//! Memory Module - Long-term memory for Kronk
//! ============================================================================
//! Remembers users and past exchanges across restarts using two JSON files
//! and brute-force vector similarity, no database required.
//!
//! ## Features
//! - Per-user summaries, refreshed with a configurable probability
//! - Conversation log with embeddings for semantic recall
//! - Bounded log size, oldest records evicted first
//! - Every external failure degrades a feature instead of failing the caller
//!
//! ## Architecture
//! ```text
//! User Message → Embed → Cosine Scan → Relevant Exchanges ─┐
//!                        User Summary ─────────────────────┤
//!                                                          ↓
//!                                  [System Prompt] + [Memory Context]
//!                                                          ↓
//!                                                    Ollama Chat
//!                                                          ↓
//!                       Record Exchange (+ embed) / Maybe Refresh Summary
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use kronk_core::{MemoryConfig, memory::MemoryManager};
//!
//! let memory = MemoryManager::from_config(MemoryConfig::from_env()).await?;
//!
//! let context = memory.build_context(user_id, message, Some(channel_id)).await;
//! // ... generate the reply ...
//! memory.record_exchange(channel_id, user_id, message, &reply).await;
//! memory.maybe_update_summary(user_id, message).await;
//!
//! memory.shutdown().await;
//! ```
//! ============================================================================

mod embeddings;
mod manager;
mod persistence;
mod recall;
mod retention;
mod store;
mod summary;
mod types;

// Re-export public types
pub use embeddings::{
    create_embedding_service, Embedder, EmbeddingApi, EmbeddingService,
    DEFAULT_OLLAMA_EMBEDDING_MODEL, DEFAULT_OPENAI_EMBEDDING_MODEL,
};
pub use manager::MemoryManager;
pub use persistence::{
    resolve_memory_dir, LoadedMemory, MemoryFiles, CONVERSATIONS_FILE, USER_SUMMARIES_FILE,
};
pub use recall::{cosine_similarity, rank};
pub use retention::enforce_limit;
pub use store::{MemoryStore, UserGuard};
pub use summary::{ChatSummarizer, Summarizer, SummaryManager};
pub use types::{
    ConversationRecord, MemoryError, MemoryStats, ScoredConversation, UpdateOutcome, UserSummaries,
    UserSummary, SNIPPET_CHARS,
};
