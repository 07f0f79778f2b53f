//! ============================================================================
//! Memory Manager - Orchestrates recall, recording and summaries
//! ============================================================================
//! The handle message handlers share. Applies the memory switches, keeps
//! external calls outside every collection lock and turns each failure into
//! a degraded result instead of an error.
//! ============================================================================

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, warn};

use super::embeddings::{create_embedding_service, Embedder};
use super::persistence::MemoryFiles;
use super::store::MemoryStore;
use super::summary::{ChatSummarizer, Summarizer, SummaryManager};
use super::types::{ConversationRecord, MemoryError, MemoryStats, ScoredConversation, UpdateOutcome, UserSummary};
use crate::config::MemoryConfig;
use crate::ollama::OllamaChat;

/// Long-term memory for the bot
pub struct MemoryManager {
    config: MemoryConfig,
    /// `None` when `do_memory` is off; nothing is ever loaded or written then
    store: Option<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    summaries: SummaryManager,
}

impl MemoryManager {
    /// Open the memory directory and wire the given collaborators
    pub async fn open(
        config: MemoryConfig,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self, MemoryError> {
        config.validate()?;

        let store = if config.do_memory {
            let files = MemoryFiles::from_config(&config);
            Some(MemoryStore::open(files, config.max_stored_conversations).await)
        } else {
            info!("Memory disabled (do_memory = false)");
            None
        };

        let summaries = SummaryManager::new(summarizer.clone(), rng, config.user_summary_update_chance);

        Ok(Self {
            config,
            store,
            embedder,
            summarizer,
            summaries,
        })
    }

    /// Open with the Ollama-backed embedder and summarizer from `config`
    pub async fn from_config(config: MemoryConfig) -> Result<Self, MemoryError> {
        let embedder = Arc::new(create_embedding_service(&config));
        let summarizer = Arc::new(ChatSummarizer::new(OllamaChat::from_config(&config)));
        let rng = Box::new(StdRng::from_entropy());
        Self::open(config, embedder, summarizer, rng).await
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn conversation_store(&self) -> Option<&MemoryStore> {
        self.store.as_ref().filter(|_| self.config.conversation_memory)
    }

    fn summary_store(&self) -> Option<&MemoryStore> {
        self.store.as_ref().filter(|_| self.config.user_memory)
    }

    // ========================================================================
    // Recall
    // ========================================================================

    /// Up to `k` past conversations most similar to `query`
    pub async fn recall(&self, query: &str, k: usize) -> Vec<ConversationRecord> {
        into_records(self.recall_scored(query, k, None).await)
    }

    /// Like [`MemoryManager::recall`], restricted to one channel
    pub async fn recall_in_channel(&self, query: &str, k: usize, channel_id: &str) -> Vec<ConversationRecord> {
        into_records(self.recall_scored(query, k, Some(channel_id)).await)
    }

    /// Recall with similarity scores attached
    pub async fn recall_scored(
        &self,
        query: &str,
        k: usize,
        channel_id: Option<&str>,
    ) -> Vec<ScoredConversation> {
        let Some(store) = self.conversation_store() else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Skipping recall: {}", e);
                return Vec::new();
            }
        };

        let results = store
            .rank(&query_vector, self.config.similarity_threshold, k, channel_id)
            .await;
        debug!("Recalled {} conversations", results.len());
        results
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Store a finished exchange and return it as stored. The record is kept
    /// even when embedding fails; it is then excluded from recall. With
    /// `summarize_conversations` on, a model-written summary is embedded in
    /// place of the raw text when one can be produced.
    pub async fn record_exchange(
        &self,
        channel_id: &str,
        author_id: &str,
        prompt: &str,
        response: &str,
    ) -> Option<ConversationRecord> {
        let store = self.conversation_store()?;

        let mut record = ConversationRecord::new(
            channel_id.to_string(),
            author_id.to_string(),
            prompt.to_string(),
            response.to_string(),
        );

        if self.config.summarize_conversations {
            match self.summarizer.summarize_exchange(prompt, response).await {
                Ok(summary) => record.exchange_summary = Some(summary),
                Err(e) => warn!("Embedding raw text of conversation {}: {}", record.id, e),
            }
        }

        match self.embedder.embed(&record.document()).await {
            Ok(vector) => record = record.with_embedding(vector),
            Err(e) => warn!("Storing conversation {} without embedding: {}", record.id, e),
        }

        if let Err(e) = store.append_conversation(&mut record).await {
            warn!("Conversation {} kept in memory only: {}", record.id, e);
        }
        Some(record)
    }

    // ========================================================================
    // Summaries
    // ========================================================================

    /// Current summary text for a user
    pub async fn user_summary(&self, user_id: &str) -> Option<String> {
        let store = self.summary_store()?;
        store.summary(user_id).await.map(|s| s.summary_text)
    }

    /// Possibly refresh a user's summary with a new message.
    /// Summarizer failures are logged and reported as `NoOp`.
    pub async fn maybe_update_summary(&self, user_id: &str, message: &str) -> UpdateOutcome {
        let Some(store) = self.summary_store() else {
            return UpdateOutcome::NoOp;
        };

        match self.summaries.maybe_update(store, user_id, message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Keeping previous summary for user {}: {}", user_id, e);
                UpdateOutcome::NoOp
            }
        }
    }

    // ========================================================================
    // Prompt context
    // ========================================================================

    /// Memory block to add to the system prompt, if there is anything to say
    pub async fn build_context(
        &self,
        user_id: &str,
        current_message: &str,
        channel_id: Option<&str>,
    ) -> Option<String> {
        let mut parts = Vec::new();

        if let Some(summary) = self.user_summary(user_id).await {
            parts.push(format!("About this user: {}", summary));
        }

        let relevant = self
            .recall_scored(current_message, self.config.recall_limit, channel_id)
            .await;
        if !relevant.is_empty() {
            let snippets: Vec<String> = relevant.iter().map(|s| s.record.document()).collect();
            parts.push(format!("Relevant past conversations:\n{}", snippets.join("\n---\n")));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    // ========================================================================
    // Inspection & lifecycle
    // ========================================================================

    /// Every stored conversation, oldest first
    pub async fn conversations(&self) -> Vec<ConversationRecord> {
        match &self.store {
            Some(store) => store.conversations().await,
            None => Vec::new(),
        }
    }

    /// Every stored summary, ordered by user id
    pub async fn summaries(&self) -> Vec<UserSummary> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let mut summaries: Vec<_> = store.summaries().await.into_values().collect();
        summaries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        summaries
    }

    pub async fn stats(&self) -> MemoryStats {
        let Some(store) = &self.store else {
            return MemoryStats {
                enabled: false,
                memory_dir: None,
                user_summaries: 0,
                conversations: 0,
                embedded_conversations: 0,
                embedding_dim: None,
                max_stored_conversations: self.config.max_stored_conversations,
            };
        };

        let (conversations, embedded_conversations, embedding_dim) = store.conversation_count().await;
        MemoryStats {
            enabled: true,
            memory_dir: Some(store.dir().to_path_buf()),
            user_summaries: store.summary_count().await,
            conversations,
            embedded_conversations,
            embedding_dim,
            max_stored_conversations: store.max_conversations(),
        }
    }

    /// Write anything not yet durable. Call before the process exits.
    pub async fn shutdown(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.flush().await {
            Ok(()) => info!("Memory flushed to {}", store.dir().display()),
            Err(e) => warn!("Memory flush incomplete: {}", e),
        }
    }
}

fn into_records(scored: Vec<ScoredConversation>) -> Vec<ConversationRecord> {
    scored.into_iter().map(|s| s.record).collect()
}
