// ============================================================================
// Memory Files — JSON persistence for summaries and the conversation log
// ============================================================================
// Two independent files under the memory directory:
//   user_summaries.json  {user_id: {summary_text, last_updated}}
//   conversations.json   [ConversationRecord, ...] oldest first
// Writes replace the whole file via <file>.tmp + rename.
// ============================================================================

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{timestamp, ConversationRecord, MemoryError, UserSummaries, UserSummary};
use crate::config::MemoryConfig;

pub const USER_SUMMARIES_FILE: &str = "user_summaries.json";
pub const CONVERSATIONS_FILE: &str = "conversations.json";

/// On-disk shape of one summary entry; the user id is the map key
#[derive(Debug, Serialize, Deserialize)]
struct StoredSummary {
    #[serde(alias = "summary")]
    summary_text: String,
    #[serde(alias = "updated_at", deserialize_with = "timestamp::deserialize")]
    last_updated: DateTime<Utc>,
}

/// Both collections as read from disk
#[derive(Debug, Default)]
pub struct LoadedMemory {
    pub summaries: UserSummaries,
    pub conversations: Vec<ConversationRecord>,
}

/// Pick the directory to use: the configured one if present, else an
/// existing legacy directory, else the configured one (created on save).
pub fn resolve_memory_dir(configured: &Path, legacy: Option<&Path>) -> PathBuf {
    if configured.is_dir() {
        return configured.to_path_buf();
    }
    if let Some(legacy) = legacy {
        if legacy.is_dir() {
            info!(
                "Memory directory {} not found, using legacy directory {}",
                configured.display(),
                legacy.display()
            );
            return legacy.to_path_buf();
        }
    }
    configured.to_path_buf()
}

/// File-level access to the memory directory
#[derive(Debug, Clone)]
pub struct MemoryFiles {
    dir: PathBuf,
}

impl MemoryFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve the directory from configuration, honouring the legacy fallback
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(resolve_memory_dir(
            &config.memory_dir,
            config.legacy_memory_dir.as_deref(),
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn summaries_path(&self) -> PathBuf {
        self.dir.join(USER_SUMMARIES_FILE)
    }

    pub fn conversations_path(&self) -> PathBuf {
        self.dir.join(CONVERSATIONS_FILE)
    }

    /// Load both collections. Never fails: a missing or unreadable file
    /// yields an empty collection for that file only.
    pub async fn load(&self) -> LoadedMemory {
        let summaries = self.load_summaries().await.unwrap_or_else(|e| {
            warn!("{} - starting with no user summaries", e);
            UserSummaries::new()
        });
        let conversations = self.load_conversations().await.unwrap_or_else(|e| {
            warn!("{} - starting with an empty conversation log", e);
            Vec::new()
        });

        info!(
            "Loaded {} user summaries and {} conversations from {}",
            summaries.len(),
            conversations.len(),
            self.dir.display()
        );

        LoadedMemory {
            summaries,
            conversations,
        }
    }

    /// Read user summaries; `Ok(empty)` when the file does not exist
    pub async fn load_summaries(&self) -> Result<UserSummaries, MemoryError> {
        let path = self.summaries_path();
        let Some(raw) = read_optional(&path).await? else {
            return Ok(UserSummaries::new());
        };

        let stored: BTreeMap<String, StoredSummary> = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => return Err(quarantine(&path, e.to_string()).await),
        };

        Ok(stored
            .into_iter()
            .map(|(user_id, entry)| {
                let summary = UserSummary {
                    user_id: user_id.clone(),
                    summary_text: entry.summary_text,
                    last_updated: entry.last_updated,
                };
                (user_id, summary)
            })
            .collect())
    }

    /// Read the conversation log; `Ok(empty)` when the file does not exist
    pub async fn load_conversations(&self) -> Result<Vec<ConversationRecord>, MemoryError> {
        let path = self.conversations_path();
        let Some(raw) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_slice(&raw) {
            Ok(records) => Ok(records),
            Err(e) => Err(quarantine(&path, e.to_string()).await),
        }
    }

    /// Replace the summaries file with `summaries`
    pub async fn save_summaries(&self, summaries: &UserSummaries) -> Result<(), MemoryError> {
        let payload = encode_summaries(summaries).map_err(|reason| MemoryError::StorageWriteFailed {
            path: self.summaries_path(),
            reason,
        })?;
        self.write_summaries(&payload).await
    }

    /// Replace the conversations file with `records`
    pub async fn save_conversations(&self, records: &[ConversationRecord]) -> Result<(), MemoryError> {
        let payload = encode_conversations(records).map_err(|reason| MemoryError::StorageWriteFailed {
            path: self.conversations_path(),
            reason,
        })?;
        self.write_conversations(&payload).await
    }

    /// Write an already-encoded summaries payload
    pub(crate) async fn write_summaries(&self, payload: &[u8]) -> Result<(), MemoryError> {
        write_atomic(&self.summaries_path(), payload).await
    }

    /// Write an already-encoded conversations payload
    pub(crate) async fn write_conversations(&self, payload: &[u8]) -> Result<(), MemoryError> {
        write_atomic(&self.conversations_path(), payload).await
    }
}

/// Serialize summaries in the on-disk map layout, keys sorted
pub(crate) fn encode_summaries(summaries: &UserSummaries) -> Result<Vec<u8>, String> {
    let stored: BTreeMap<&str, StoredSummary> = summaries
        .values()
        .map(|s| {
            (
                s.user_id.as_str(),
                StoredSummary {
                    summary_text: s.summary_text.clone(),
                    last_updated: s.last_updated,
                },
            )
        })
        .collect();
    serde_json::to_vec_pretty(&stored).map_err(|e| format!("failed to serialize summaries: {}", e))
}

pub(crate) fn encode_conversations(records: &[ConversationRecord]) -> Result<Vec<u8>, String> {
    serde_json::to_vec_pretty(records).map_err(|e| format!("failed to serialize conversations: {}", e))
}

/// Raw file contents; `None` when the file does not exist.
/// Anything else that cannot be read is moved aside like a parse failure.
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, MemoryError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist yet", path.display());
            Ok(None)
        }
        Err(e) => Err(quarantine(path, format!("read failed: {}", e)).await),
    }
}

/// Move a file that could not be loaded out of the way so the next save does
/// not overwrite it, and describe the failure.
async fn quarantine(path: &Path, reason: String) -> MemoryError {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);

    match tokio::fs::rename(path, &aside).await {
        Ok(()) => warn!("Moved unreadable {} to {}", path.display(), aside.display()),
        Err(e) => warn!("Could not move unreadable {} aside: {}", path.display(), e),
    }

    MemoryError::StorageReadCorrupt {
        path: path.to_path_buf(),
        reason,
    }
}

async fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), MemoryError> {
    let failed = |reason: String| MemoryError::StorageWriteFailed {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("failed to create {}: {}", parent.display(), e)))?;
        }
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, payload)
        .await
        .map_err(|e| failed(format!("failed to write temp file: {}", e)))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| failed(format!("failed to move temp file into place: {}", e)))?;

    debug!("Wrote {} bytes to {}", payload.len(), path.display());
    Ok(())
}
