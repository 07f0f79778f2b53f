//! ============================================================================
//! Summary Manager - Probabilistic per-user profile refresh
//! ============================================================================
//! Each message has a configurable chance of regenerating its author's
//! summary from the prior summary plus the new message. The new text fully
//! replaces the old one.
//! ============================================================================

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::{Rng, RngCore};
use tracing::{debug, warn};

use super::store::MemoryStore;
use super::types::{clip, MemoryError, UpdateOutcome, UserSummary};
use crate::ollama::{ChatMessage, OllamaChat};

/// Produces a new user summary from the previous one and a new message
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `prior` is empty when the user has no summary yet
    async fn summarize(&self, prior: &str, message: &str) -> Result<String, MemoryError>;

    /// A few sentences describing one prompt/response exchange.
    /// Summarizers that cannot do this keep the default.
    async fn summarize_exchange(&self, _prompt: &str, _response: &str) -> Result<String, MemoryError> {
        Err(MemoryError::SummarizationUnavailable(
            "exchange summaries are not supported".to_string(),
        ))
    }
}

/// Characters of each side of an exchange shown to the model
const EXCHANGE_PROMPT_CHARS: usize = 300;

/// Summarizer backed by an Ollama chat model
pub struct ChatSummarizer {
    chat: OllamaChat,
}

impl ChatSummarizer {
    pub fn new(chat: OllamaChat) -> Self {
        Self { chat }
    }

    async fn complete(&self, prompt: String) -> Result<String, MemoryError> {
        let reply = self
            .chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| MemoryError::SummarizationUnavailable(e.to_string()))?;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(MemoryError::SummarizationUnavailable(
                "model returned an empty summary".to_string(),
            ));
        }
        Ok(reply.to_string())
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, prior: &str, message: &str) -> Result<String, MemoryError> {
        self.complete(summary_prompt(prior, message)).await
    }

    async fn summarize_exchange(&self, prompt: &str, response: &str) -> Result<String, MemoryError> {
        self.complete(exchange_prompt(prompt, response)).await
    }
}

fn summary_prompt(prior: &str, message: &str) -> String {
    let previous = if prior.is_empty() {
        String::new()
    } else {
        format!("Previous summary: {}\n\n", prior)
    };

    format!(
        "{previous}Based on this recent message from the user, write a brief summary of what you know about them.\n\
Include: personality traits, interests, how they communicate, any facts they've shared.\n\
Keep it under 100 words. Be factual, not speculative.\n\n\
Recent message:\n{message}"
    )
}

fn exchange_prompt(prompt: &str, response: &str) -> String {
    format!(
        "Summarize this conversation in 2-3 sentences. Focus on the main topic and any important information exchanged.\n\n\
user: {}\nassistant: {}",
        clip(prompt, EXCHANGE_PROMPT_CHARS),
        clip(response, EXCHANGE_PROMPT_CHARS)
    )
}

/// Decides when to refresh a summary and applies the refresh
pub struct SummaryManager {
    summarizer: Arc<dyn Summarizer>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    update_chance: f64,
}

impl SummaryManager {
    pub fn new(summarizer: Arc<dyn Summarizer>, rng: Box<dyn RngCore + Send>, update_chance: f64) -> Self {
        Self {
            summarizer,
            rng: Mutex::new(rng),
            update_chance,
        }
    }

    pub fn update_chance(&self) -> f64 {
        self.update_chance
    }

    /// Draw from [0, 1) and compare against the update chance
    fn roll(&self) -> bool {
        let draw: f64 = match self.rng.lock() {
            Ok(mut rng) => rng.gen(),
            Err(poisoned) => poisoned.into_inner().gen(),
        };
        draw < self.update_chance
    }

    /// Maybe regenerate `user_id`'s summary from `message`.
    ///
    /// Concurrent calls for the same user run one after another. On
    /// summarizer failure the stored summary is left as it was. A failed save
    /// is not an error here: the new summary is live in memory and will be
    /// written on the next flush.
    pub async fn maybe_update(
        &self,
        store: &MemoryStore,
        user_id: &str,
        message: &str,
    ) -> Result<UpdateOutcome, MemoryError> {
        if !self.roll() {
            return Ok(UpdateOutcome::NoOp);
        }

        let _user_guard = store.lock_user(user_id).await;

        let prior = store
            .summary(user_id)
            .await
            .map(|s| s.summary_text)
            .unwrap_or_default();

        debug!("Regenerating summary for user {}", user_id);
        let text = self.summarizer.summarize(&prior, message).await?;

        let summary = UserSummary::new(user_id.to_string(), text);
        if let Err(e) = store.put_summary(summary.clone()).await {
            warn!("Summary for user {} not saved yet: {}", user_id, e);
        }

        Ok(UpdateOutcome::Updated(summary))
    }
}
