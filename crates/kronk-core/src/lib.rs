//! ============================================================================
//! KRONK-CORE: Kronk's long-term memory
//! ============================================================================
//! This crate handles everything the bot remembers between restarts:
//! - Per-user summaries regenerated by the chat model
//! - Semantically searchable conversation log (Ollama embeddings)
//! - JSON persistence with legacy directory fallback
//! - Ollama chat client shared by the summarizer and the CLI
//! ============================================================================

pub mod config;
pub mod memory;
pub mod ollama;

// Re-export main types for convenience
pub use config::MemoryConfig;
pub use memory::{ConversationRecord, MemoryError, MemoryManager, UpdateOutcome, UserSummary};
pub use ollama::{ChatMessage, OllamaChat};
