// ============================================================================
// MemoryConfig — resolved settings for the memory subsystem
// ============================================================================
// Defaults match the bot's shipped config. Any field can be overridden by an
// environment variable (KRONK_*), usually loaded from .env by the host.
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::memory::MemoryError;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default chat model used for summaries and replies
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-oss:20b";

/// Directory name used by earlier releases, relative to the working directory
pub const LEGACY_MEMORY_DIR: &str = "kronk_memory";

/// Memory subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Master switch; when false nothing is read, written or called
    pub do_memory: bool,
    /// Per-user summaries
    pub user_memory: bool,
    /// Conversation log and recall
    pub conversation_memory: bool,
    /// Probability in [0, 1] that a message triggers a summary refresh
    pub user_summary_update_chance: f64,
    /// Upper bound on stored conversation records
    pub max_stored_conversations: usize,
    /// Where the memory files live
    pub memory_dir: PathBuf,
    /// Fallback directory used when `memory_dir` does not exist yet
    pub legacy_memory_dir: Option<PathBuf>,
    /// Minimum cosine similarity for a record to be recalled
    pub similarity_threshold: f32,
    /// Number of snippets injected into the prompt context
    pub recall_limit: usize,
    /// Embed a model-written summary of each exchange instead of its raw text
    pub summarize_conversations: bool,
    pub ollama_url: String,
    pub embedding_model: String,
    pub summary_model: String,
    /// Timeout applied to every external inference call
    pub request_timeout_secs: u64,
    /// When set, embeddings go to the OpenAI-compatible API instead of Ollama
    pub openai_api_key: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            do_memory: true,
            user_memory: true,
            conversation_memory: true,
            user_summary_update_chance: 0.2,
            max_stored_conversations: 500,
            memory_dir: default_memory_dir(),
            legacy_memory_dir: Some(PathBuf::from(LEGACY_MEMORY_DIR)),
            similarity_threshold: 0.3,
            recall_limit: 2,
            summarize_conversations: false,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_model: crate::memory::DEFAULT_OLLAMA_EMBEDDING_MODEL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            request_timeout_secs: 120,
            openai_api_key: None,
        }
    }
}

impl MemoryConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay KRONK_* environment variables onto this config.
    /// Unparsable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        override_from_env("KRONK_DO_MEMORY", &mut self.do_memory);
        override_from_env("KRONK_USER_MEMORY", &mut self.user_memory);
        override_from_env("KRONK_CONVERSATION_MEMORY", &mut self.conversation_memory);
        override_from_env("KRONK_SUMMARY_UPDATE_CHANCE", &mut self.user_summary_update_chance);
        override_from_env("KRONK_MAX_STORED_CONVERSATIONS", &mut self.max_stored_conversations);
        override_from_env("KRONK_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_from_env("KRONK_RECALL_LIMIT", &mut self.recall_limit);
        override_from_env("KRONK_SUMMARIZE_CONVERSATIONS", &mut self.summarize_conversations);
        override_from_env("KRONK_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);

        if let Ok(dir) = std::env::var("KRONK_MEMORY_DIR") {
            self.memory_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.ollama_url = url;
        }
        if let Ok(model) = std::env::var("KRONK_EMBEDDING_MODEL") {
            self.embedding_model = model;
        }
        if let Ok(model) = std::env::var("KRONK_MODEL") {
            self.summary_model = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.openai_api_key = Some(key);
            }
        }
    }

    /// Reject values the memory components cannot work with
    pub fn validate(&self) -> Result<(), MemoryError> {
        if !(0.0..=1.0).contains(&self.user_summary_update_chance) {
            return Err(MemoryError::InvalidConfig(format!(
                "user_summary_update_chance must be within [0, 1], got {}",
                self.user_summary_update_chance
            )));
        }
        if self.max_stored_conversations == 0 {
            return Err(MemoryError::InvalidConfig(
                "max_stored_conversations must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MemoryError::InvalidConfig(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// ~/.kronk/memory, or ./kronk_data/memory when no home directory exists
fn default_memory_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kronk").join("memory"))
        .unwrap_or_else(|| PathBuf::from("kronk_data").join("memory"))
}

fn override_from_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring {}={:?}: not a valid value", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const ENV_KEYS: [&str; 6] = [
        "KRONK_DO_MEMORY",
        "KRONK_MAX_STORED_CONVERSATIONS",
        "KRONK_SIMILARITY_THRESHOLD",
        "KRONK_MEMORY_DIR",
        "OLLAMA_URL",
        "OPENAI_API_KEY",
    ];

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.do_memory);
        assert_eq!(config.max_stored_conversations, 500);
        assert_eq!(config.legacy_memory_dir, Some(PathBuf::from(LEGACY_MEMORY_DIR)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MemoryConfig::default();
        config.user_summary_update_chance = 1.5;
        assert!(matches!(config.validate(), Err(MemoryError::InvalidConfig(_))));

        let mut config = MemoryConfig::default();
        config.max_stored_conversations = 0;
        assert!(config.validate().is_err());

        let mut config = MemoryConfig::default();
        config.similarity_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"do_memory": false, "max_stored_conversations": 10}"#).unwrap();
        assert!(!config.do_memory);
        assert_eq!(config.max_stored_conversations, 10);
        assert!(config.user_memory);
        assert_eq!(config.recall_limit, 2);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("KRONK_DO_MEMORY", "false");
        std::env::set_var("KRONK_MAX_STORED_CONVERSATIONS", " 42 ");
        std::env::set_var("KRONK_SIMILARITY_THRESHOLD", "very similar");
        std::env::set_var("KRONK_MEMORY_DIR", "/tmp/kronk-env-memory");
        std::env::set_var("OLLAMA_URL", "http://gpu-box:11434");
        std::env::set_var("OPENAI_API_KEY", "sk-test");

        let config = MemoryConfig::from_env();
        clear_env();

        assert!(!config.do_memory);
        assert_eq!(config.max_stored_conversations, 42);
        // Unparsable value keeps the default
        assert_eq!(config.similarity_threshold, 0.3);
        assert_eq!(config.memory_dir, PathBuf::from("/tmp/kronk-env-memory"));
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_empty_api_key_is_ignored() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "");

        let config = MemoryConfig::from_env();
        clear_env();

        assert!(config.openai_api_key.is_none());
        assert!(config.do_memory);
    }
}
