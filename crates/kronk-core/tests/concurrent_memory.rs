//! Drives the memory manager from many concurrent message tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use kronk_core::memory::{Embedder, MemoryFiles, Summarizer};
use kronk_core::{MemoryConfig, MemoryError, MemoryManager};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

/// Slow embedder so appends overlap; vector encodes the message number
struct SlowEmbedder;

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let weight = text.len() as f32;
        Ok(vec![1.0, weight])
    }
}

/// Appends the message to the prior summary, yielding in between so two
/// unsynchronized updates for one user would lose a write
#[derive(Default)]
struct AccumulatingSummarizer {
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
}

#[async_trait]
impl Summarizer for AccumulatingSummarizer {
    async fn summarize(&self, prior: &str, message: &str) -> Result<String, MemoryError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("{}[{}]", prior, message))
    }
}

fn config(tmp: &TempDir, max: usize) -> MemoryConfig {
    MemoryConfig {
        memory_dir: tmp.path().join("memory"),
        legacy_memory_dir: None,
        max_stored_conversations: max,
        user_summary_update_chance: 1.0,
        similarity_threshold: 0.0,
        ..MemoryConfig::default()
    }
}

async fn open(config: MemoryConfig, summarizer: Arc<AccumulatingSummarizer>) -> Arc<MemoryManager> {
    Arc::new(
        MemoryManager::open(
            config,
            Arc::new(SlowEmbedder),
            summarizer,
            Box::new(StdRng::seed_from_u64(99)),
        )
        .await
        .unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_stay_bounded_and_durable() {
    let tmp = TempDir::new().unwrap();
    let memory = open(config(&tmp, 25), Arc::default()).await;

    let tasks = (0..80).map(|i| {
        let memory = memory.clone();
        tokio::spawn(async move {
            memory
                .record_exchange(&format!("chan{}", i % 4), "user", &format!("message {}", i), "ok")
                .await
        })
    });
    for result in join_all(tasks).await {
        assert!(result.unwrap().is_some());
    }

    let in_memory = memory.conversations().await;
    assert_eq!(in_memory.len(), 25);

    memory.shutdown().await;
    let on_disk = MemoryFiles::new(tmp.path().join("memory"))
        .load_conversations()
        .await
        .unwrap();
    assert_eq!(on_disk, in_memory);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_updates_never_lose_a_write() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(AccumulatingSummarizer::default());
    let memory = open(config(&tmp, 10), summarizer.clone()).await;

    let tasks = (0..20).map(|i| {
        let memory = memory.clone();
        tokio::spawn(async move { memory.maybe_update_summary("alice", &format!("m{}", i)).await })
    });
    for outcome in join_all(tasks).await {
        assert!(outcome.unwrap().is_updated());
    }

    let summary = memory.user_summary("alice").await.unwrap();
    for i in 0..20 {
        assert!(summary.contains(&format!("[m{}]", i)), "lost m{} in {}", i, summary);
    }
    assert_eq!(summarizer.overlaps.load(Ordering::SeqCst), 0);

    memory.shutdown().await;
    let reopened = open(config(&tmp, 10), Arc::default()).await;
    assert_eq!(reopened.user_summary("alice").await.unwrap(), summary);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_users_update_in_parallel() {
    let tmp = TempDir::new().unwrap();
    let summarizer = Arc::new(AccumulatingSummarizer::default());
    let memory = open(config(&tmp, 10), summarizer.clone()).await;

    let tasks = (0..8).map(|i| {
        let memory = memory.clone();
        tokio::spawn(async move { memory.maybe_update_summary(&format!("user{}", i), "hello").await })
    });
    join_all(tasks).await;

    assert_eq!(memory.summaries().await.len(), 8);
    for i in 0..8 {
        assert_eq!(memory.user_summary(&format!("user{}", i)).await.unwrap(), "[hello]");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recalls_run_alongside_writes() {
    let tmp = TempDir::new().unwrap();
    let memory = open(config(&tmp, 50), Arc::default()).await;
    for i in 0..10 {
        memory.record_exchange("c", "u", &format!("seed {}", i), "ok").await;
    }

    let writers = (0..20).map(|i| {
        let memory = memory.clone();
        tokio::spawn(async move {
            memory.record_exchange("c", "u", &format!("more {}", i), "ok").await;
            memory.maybe_update_summary("u", "note").await;
        })
    });
    let readers = (0..20).map(|_| {
        let memory = memory.clone();
        tokio::spawn(async move { memory.recall("seed", 3).await.len() })
    });

    let (_, counts) = tokio::join!(join_all(writers), join_all(readers));
    for count in counts {
        assert_eq!(count.unwrap(), 3);
    }
    assert_eq!(memory.conversations().await.len(), 30);
}
