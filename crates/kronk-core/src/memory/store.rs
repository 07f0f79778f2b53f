//! ============================================================================
//! Memory Store - In-memory collections backed by the memory files
//! ============================================================================
//! Owns the conversation log and the user summaries, the locks guarding
//! them, and the bookkeeping that keeps the files in step with memory.
//!
//! Each collection carries a generation counter bumped on every mutation.
//! A save writes the snapshot taken at that generation and is skipped when
//! a newer generation already reached disk, so concurrent saves can finish
//! in any order without regressing the file. Snapshots are encoded after the
//! collection lock is released.
//! ============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::persistence::{encode_conversations, encode_summaries, MemoryFiles};
use super::recall;
use super::retention;
use super::types::{ConversationRecord, MemoryError, ScoredConversation, UserSummaries, UserSummary};

struct ConversationLog {
    /// Oldest first
    records: Vec<ConversationRecord>,
    /// Length shared by every stored embedding; `None` while no record has one
    embedding_dim: Option<usize>,
    generation: u64,
}

struct SummaryTable {
    entries: UserSummaries,
    generation: u64,
}

type UserLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Shared store for both memory collections
pub struct MemoryStore {
    files: MemoryFiles,
    max_conversations: usize,
    conversations: RwLock<ConversationLog>,
    summaries: RwLock<SummaryTable>,
    /// One lock per user with an update in progress
    user_locks: UserLocks,
    /// Last generation of each collection known to be on disk
    conversations_written: Mutex<u64>,
    summaries_written: Mutex<u64>,
}

/// Exclusive access to one user's summary.
/// The user's lock entry is removed once nobody holds or awaits it.
pub struct UserGuard<'a> {
    locks: &'a UserLocks,
    user_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Remaining references: the table entry and this guard
        if Arc::strong_count(&self.lock) == 2 {
            if let Some(entry) = locks.get(&self.user_id) {
                if Arc::ptr_eq(entry, &self.lock) {
                    locks.remove(&self.user_id);
                }
            }
        }
    }
}

impl MemoryStore {
    /// Load both collections from `files`
    pub async fn open(files: MemoryFiles, max_conversations: usize) -> Self {
        let loaded = files.load().await;

        let mut records = loaded.conversations;
        normalize_dimensions(&mut records);
        let mut generation = 0;

        let evicted = retention::enforce_limit(&mut records, max_conversations);
        if evicted > 0 {
            info!(
                "Dropped {} stored conversations above the limit of {}",
                evicted, max_conversations
            );
            generation = 1;
        }
        let embedding_dim = stored_dimension(&records);

        Self {
            files,
            max_conversations,
            conversations: RwLock::new(ConversationLog {
                records,
                embedding_dim,
                generation,
            }),
            summaries: RwLock::new(SummaryTable {
                entries: loaded.summaries,
                generation: 0,
            }),
            user_locks: StdMutex::new(HashMap::new()),
            conversations_written: Mutex::new(0),
            summaries_written: Mutex::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        self.files.dir()
    }

    pub fn max_conversations(&self) -> usize {
        self.max_conversations
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Append a record, evict beyond the limit and persist.
    ///
    /// A vector whose length disagrees with the stored ones is removed from
    /// `record` as well, so the caller sees what was actually kept. The
    /// record stays in memory even when the save fails; the returned error
    /// only means the change is not durable yet.
    pub async fn append_conversation(&self, record: &mut ConversationRecord) -> Result<(), MemoryError> {
        let (generation, snapshot) = {
            let mut log = self.conversations.write().await;

            if let Some(vector) = &record.embedding_vector {
                match log.embedding_dim {
                    Some(dim) if dim != vector.len() => {
                        warn!(
                            "Embedding for conversation {} has {} dimensions, expected {} - storing without it",
                            record.id,
                            vector.len(),
                            dim
                        );
                        record.embedding_vector = None;
                    }
                    Some(_) => {}
                    None => log.embedding_dim = Some(vector.len()),
                }
            }

            debug!("Appending conversation {} in channel {}", record.id, record.channel_id);
            log.records.push(record.clone());

            let evicted = retention::enforce_limit(&mut log.records, self.max_conversations);
            if evicted > 0 {
                debug!("Evicted {} oldest conversations", evicted);
                let dim = stored_dimension(&log.records);
                if dim.is_none() && log.embedding_dim.is_some() {
                    info!("No stored embeddings left, accepting any embedding dimension");
                }
                log.embedding_dim = dim;
            }

            log.generation += 1;
            (log.generation, log.records.clone())
        };

        self.persist_conversations(generation, snapshot).await
    }

    /// Rank stored conversations against a query vector
    pub async fn rank(
        &self,
        query: &[f32],
        threshold: f32,
        k: usize,
        channel_id: Option<&str>,
    ) -> Vec<ScoredConversation> {
        let log = self.conversations.read().await;

        if let Some(dim) = log.embedding_dim {
            if dim != query.len() {
                warn!(
                    "Query embedding has {} dimensions but stored vectors have {} - skipping recall",
                    query.len(),
                    dim
                );
                return Vec::new();
            }
        }

        recall::rank(&log.records, query, threshold, k, channel_id)
    }

    /// Copy of the conversation log, oldest first
    pub async fn conversations(&self) -> Vec<ConversationRecord> {
        self.conversations.read().await.records.clone()
    }

    pub async fn conversation_count(&self) -> (usize, usize, Option<usize>) {
        let log = self.conversations.read().await;
        let embedded = log.records.iter().filter(|r| r.has_embedding()).count();
        (log.records.len(), embedded, log.embedding_dim)
    }

    // ========================================================================
    // Summaries
    // ========================================================================

    pub async fn summary(&self, user_id: &str) -> Option<UserSummary> {
        self.summaries.read().await.entries.get(user_id).cloned()
    }

    pub async fn summaries(&self) -> UserSummaries {
        self.summaries.read().await.entries.clone()
    }

    pub async fn summary_count(&self) -> usize {
        self.summaries.read().await.entries.len()
    }

    /// Insert or replace a user's summary and persist
    pub async fn put_summary(&self, summary: UserSummary) -> Result<(), MemoryError> {
        let (generation, snapshot) = {
            let mut table = self.summaries.write().await;
            debug!("Replacing summary for user {}", summary.user_id);
            table.entries.insert(summary.user_id.clone(), summary);
            table.generation += 1;
            (table.generation, table.entries.clone())
        };

        self.persist_summaries(generation, snapshot).await
    }

    /// Wait for exclusive access to one user's summary.
    /// Hold the guard across the whole read-summarize-write cycle.
    pub async fn lock_user(&self, user_id: &str) -> UserGuard<'_> {
        let lock = {
            let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;

        UserGuard {
            locks: &self.user_locks,
            user_id: user_id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write every collection whose latest state is not on disk yet
    pub async fn flush(&self) -> Result<(), MemoryError> {
        let mut result = Ok(());

        let (generation, snapshot) = {
            let log = self.conversations.read().await;
            (log.generation, log.records.clone())
        };
        if let Err(e) = self.persist_conversations(generation, snapshot).await {
            warn!("Failed to flush conversations: {}", e);
            result = Err(e);
        }

        let (generation, snapshot) = {
            let table = self.summaries.read().await;
            (table.generation, table.entries.clone())
        };
        if let Err(e) = self.persist_summaries(generation, snapshot).await {
            warn!("Failed to flush user summaries: {}", e);
            result = Err(e);
        }

        result
    }

    async fn persist_conversations(
        &self,
        generation: u64,
        snapshot: Vec<ConversationRecord>,
    ) -> Result<(), MemoryError> {
        let mut written = self.conversations_written.lock().await;
        if *written >= generation {
            return Ok(());
        }

        let payload = encode_conversations(&snapshot).map_err(|reason| MemoryError::StorageWriteFailed {
            path: self.files.conversations_path(),
            reason,
        })?;
        self.files.write_conversations(&payload).await?;
        *written = generation;
        Ok(())
    }

    async fn persist_summaries(&self, generation: u64, snapshot: UserSummaries) -> Result<(), MemoryError> {
        let mut written = self.summaries_written.lock().await;
        if *written >= generation {
            return Ok(());
        }

        let payload = encode_summaries(&snapshot).map_err(|reason| MemoryError::StorageWriteFailed {
            path: self.files.summaries_path(),
            reason,
        })?;
        self.files.write_summaries(&payload).await?;
        *written = generation;
        Ok(())
    }
}

/// Length of the stored vectors, if any record still carries one
fn stored_dimension(records: &[ConversationRecord]) -> Option<usize> {
    records
        .iter()
        .find_map(|r| r.embedding_vector.as_ref().map(Vec::len))
}

/// Clear vectors whose length differs from the first stored vector
fn normalize_dimensions(records: &mut [ConversationRecord]) {
    let Some(dim) = stored_dimension(records) else {
        return;
    };

    let mut cleared = 0;
    for record in records.iter_mut() {
        if record.embedding_vector.as_ref().is_some_and(|v| v.len() != dim) {
            record.embedding_vector = None;
            cleared += 1;
        }
    }
    if cleared > 0 {
        warn!(
            "Cleared {} stored embeddings that did not match the first stored vector ({} dimensions)",
            cleared, dim
        );
    }
}
