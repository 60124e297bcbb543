//! Memory Manager
//!
//! Orchestrates the memory lifecycle on top of the store, the embedding
//! queue and the summarizer:
//! 1. Retrieval: embed query -> user-scoped nearest-neighbour search
//! 2. Ingestion: embed text -> persist raw record
//! 3. Compaction: count -> select batch -> summarize -> embed summary ->
//!    persist summary -> mark originals superseded -> delete originals

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::EmbeddingQueue;
use crate::error::{CortexError, Result};
use crate::memory::background::{BackgroundTasks, TaskHandle};
use crate::memory::compaction::{CompactionConfig, CompactionOutcome, UserLocks};
use crate::memory::types::{MemoryKind, MemoryRecord, UserProfile};
use crate::storage::{MemoryStore, UserDirectory};
use crate::summarizer::SummarizationService;

/// Settings the manager is constructed with
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Nearest neighbours returned by `retrieve`
    pub top_k: usize,
    pub compaction: CompactionConfig,
    /// Bio returned for users without one
    pub default_bio: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            compaction: CompactionConfig::from(&config.compaction),
            default_bio: config.chat.default_bio.clone(),
        }
    }
}

/// Live record counts for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub raw: usize,
    pub summaries: usize,
}

/// Entry point for every memory operation.
///
/// Cheap to clone; clones share the same collaborators, locks and
/// background queue.
#[derive(Clone)]
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    users: Arc<dyn UserDirectory>,
    embedder: Arc<EmbeddingQueue>,
    summarizer: Arc<dyn SummarizationService>,
    config: Arc<ManagerConfig>,
    locks: Arc<UserLocks>,
    background: Arc<BackgroundTasks>,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        users: Arc<dyn UserDirectory>,
        embedder: Arc<EmbeddingQueue>,
        summarizer: Arc<dyn SummarizationService>,
        config: ManagerConfig,
        background: BackgroundTasks,
    ) -> Self {
        info!(
            "MemoryManager ready (top_k={}, compaction threshold={}, batch={}, summarizer={})",
            config.top_k,
            config.compaction.threshold,
            config.compaction.batch_size,
            summarizer.name()
        );

        Self {
            store,
            users,
            embedder,
            summarizer,
            config: Arc::new(config),
            locks: Arc::new(UserLocks::new()),
            background: Arc::new(background),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub fn embedder(&self) -> &EmbeddingQueue {
        &self.embedder
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    /// Nearest memories for `query`, or nothing if any step fails
    pub async fn retrieve(&self, user_id: &str, query: &str) -> Vec<MemoryRecord> {
        match self.try_retrieve(user_id, query).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Retrieval for user {} failed, returning no memories: {}", user_id, e);
                Vec::new()
            }
        }
    }

    /// Nearest memories for `query`, nearest first
    pub async fn try_retrieve(&self, user_id: &str, query: &str) -> Result<Vec<MemoryRecord>> {
        let query = query.trim();
        let embedding = self.embedder.enqueue(user_id, query).await?;
        if embedding.degraded {
            warn!("Searching with a fallback query vector for user {}", user_id);
        }

        let records = self
            .store
            .search(&embedding.vector, user_id, self.config.top_k)
            .await?;

        debug!("Retrieved {} memories for user {}", records.len(), user_id);
        Ok(records)
    }

    /// Embed and persist one raw memory
    pub async fn save(&self, user_id: &str, text: &str) -> Result<Uuid> {
        let embedding = self.embedder.enqueue(user_id, text).await?;
        if embedding.degraded {
            warn!("Saving memory for user {} with a fallback vector", user_id);
        }

        let id = self.store.save(user_id, text, embedding.vector).await?;
        debug!("Saved memory {} for user {}", id, user_id);
        Ok(id)
    }

    /// Queue a [`save`](Self::save) on the background queue.
    ///
    /// At most once: a failure is reported on the handle and the event
    /// channel, never retried.
    pub async fn save_async(&self, user_id: &str, text: &str) -> TaskHandle {
        let manager = self.clone();
        let user = user_id.to_string();
        let text = text.to_string();

        self.background
            .submit("save", user_id, async move {
                manager.save(&user, &text).await.map(|_| ())
            })
            .await
    }

    /// Queue the post-reply bookkeeping of one chat turn: save the user's
    /// message, save the reply, then run the compaction check.
    ///
    /// Every step runs; the first error is what the handle reports.
    pub async fn record_interaction(&self, user_id: &str, message: &str, reply: &str) -> TaskHandle {
        let manager = self.clone();
        let user = user_id.to_string();
        let turns = [message.to_string(), format!("AI: {reply}")];

        self.background
            .submit("record_interaction", user_id, async move {
                let mut first_error = None;

                for turn in &turns {
                    if let Err(e) = manager.save(&user, turn).await {
                        warn!("Failed to save turn for user {}: {}", user, e);
                        first_error.get_or_insert(e);
                    }
                }

                match manager.check_and_summarize(&user).await {
                    Ok(outcome) => debug!("Compaction check for {}: {}", user, outcome.describe()),
                    Err(e) => {
                        warn!("Compaction check for user {} failed: {}", user, e);
                        first_error.get_or_insert(e);
                    }
                }

                first_error.map_or(Ok(()), Err)
            })
            .await
    }

    /// Compact if the user's live raw count has reached the threshold
    pub async fn check_and_summarize(&self, user_id: &str) -> Result<CompactionOutcome> {
        let policy = &self.config.compaction;
        if !policy.enabled {
            return Ok(CompactionOutcome::Disabled);
        }

        let count = self.store.get_memory_count(user_id).await?;
        if count < policy.threshold {
            debug!(
                "User {} has {} raw memories, below threshold {}",
                user_id, count, policy.threshold
            );
            return Ok(CompactionOutcome::BelowThreshold {
                count,
                threshold: policy.threshold,
            });
        }

        info!(
            "User {} reached {} raw memories (threshold {}), compacting",
            user_id, count, policy.threshold
        );
        self.summarize_user_memories(user_id).await
    }

    /// Fold the user's oldest eligible raw memories into one summary.
    ///
    /// Holds the user's lock for the whole run. Nothing is written unless
    /// the summary and its embedding were produced, and nothing is deleted
    /// unless the summary was persisted.
    pub async fn summarize_user_memories(&self, user_id: &str) -> Result<CompactionOutcome> {
        let _guard = self.locks.acquire(user_id).await;
        let policy = &self.config.compaction;

        if let Err(e) = self.sweep_locked(user_id).await {
            warn!("Sweep before compaction failed for user {}: {}", user_id, e);
        }

        let batch = self
            .store
            .get_old_memories(user_id, policy.max_age_days, policy.batch_size)
            .await?;

        if batch.is_empty() {
            debug!("Nothing to compact for user {}", user_id);
            return Ok(CompactionOutcome::NothingToCompact);
        }

        let ids: Vec<Uuid> = batch.iter().map(MemoryRecord::id).collect();
        let contents: Vec<String> = batch.iter().map(|r| r.content().to_string()).collect();

        let summary = self.summarizer.summarize(&contents, user_id).await?;

        let embedding = self.embedder.enqueue(user_id, &summary).await?;
        if embedding.degraded {
            return Err(CortexError::Memory(format!(
                "summary embedding for user {user_id} fell back to a placeholder; compaction postponed"
            )));
        }

        let summary_id = self
            .store
            .save_summary(&summary, user_id, &ids, embedding.vector)
            .await?;

        if let Err(e) = self.store.mark_superseded(&ids, summary_id).await {
            warn!(
                "Could not mark originals of summary {} superseded: {}",
                summary_id, e
            );
        }

        let report = self.store.delete_memories(&ids).await;
        if report.is_complete() {
            info!(
                "Compacted {} memories of user {} into summary {}",
                ids.len(),
                user_id,
                summary_id
            );
            Ok(CompactionOutcome::Compacted {
                summary_id,
                replaced: ids,
            })
        } else {
            warn!(
                "Summary {} written but {} of {} originals were not deleted",
                summary_id,
                report.failed.len(),
                ids.len()
            );
            Ok(CompactionOutcome::PartiallyCompacted {
                summary_id,
                undeleted: report.failed_ids(),
                deleted: report.deleted,
            })
        }
    }

    /// Delete superseded records left behind by failed deletions
    pub async fn sweep_superseded(&self, user_id: &str) -> Result<usize> {
        let _guard = self.locks.acquire(user_id).await;
        self.sweep_locked(user_id).await
    }

    async fn sweep_locked(&self, user_id: &str) -> Result<usize> {
        let ids = self.store.superseded_ids(user_id).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let report = self.store.delete_memories(&ids).await;
        if !report.is_complete() {
            warn!(
                "Sweep for user {} left {} superseded memories",
                user_id,
                report.failed.len()
            );
        }
        info!("Swept {} superseded memories for user {}", report.deleted.len(), user_id);
        Ok(report.deleted.len())
    }

    /// Live raw and summary counts
    pub async fn stats(&self, user_id: &str) -> Result<MemoryStats> {
        Ok(MemoryStats {
            raw: self.store.count_by_kind(user_id, MemoryKind::Raw).await?,
            summaries: self.store.count_by_kind(user_id, MemoryKind::Summary).await?,
        })
    }

    /// The user's bio, or the configured default when none is stored
    pub async fn get_user_bio(&self, user_id: &str) -> Result<String> {
        Ok(self
            .users
            .get_user_bio(user_id)
            .await?
            .unwrap_or_else(|| self.config.default_bio.clone()))
    }

    /// Create a placeholder profile for unknown users
    pub async fn ensure_user_exists(&self, user_id: &str) -> Result<()> {
        if self.users.ensure_user(user_id).await? {
            info!("Registered unknown user {}", user_id);
        }
        Ok(())
    }

    /// Create a profile with a generated id and return the id
    pub async fn register_user(&self, username: &str, bio: &str) -> Result<String> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CortexError::Memory("username must not be empty".to_string()));
        }

        let user_id = generate_user_id();
        self.users
            .register_user(&UserProfile::new(&user_id, username, bio))
            .await?;

        info!("Registered user {} as {}", username, user_id);
        Ok(user_id)
    }

    /// Run queued background work to completion, then stop the embedding workers
    pub async fn shutdown(&self) {
        self.background.shutdown().await;
        self.embedder.close().await;
    }
}

/// `u-<unix seconds>-<8 hex chars>`
fn generate_user_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("u-{}-{}", Utc::now().timestamp(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::QueueConfig;
    use crate::testing::{InMemoryStore, MockEmbeddingGateway, StubSummarizer};
    use std::time::Duration;

    fn manager_with(store: Arc<InMemoryStore>) -> MemoryManager {
        let gateway = Arc::new(MockEmbeddingGateway::new(8));
        let queue = EmbeddingQueue::new(
            gateway,
            QueueConfig {
                workers: 2,
                capacity: 16,
                max_attempts: 5,
                backoff_unit: Duration::from_millis(1),
                dimension: 8,
            },
        );
        MemoryManager::new(
            store.clone(),
            store,
            Arc::new(queue),
            Arc::new(StubSummarizer::new()),
            ManagerConfig {
                top_k: 10,
                compaction: CompactionConfig::new(2, 2),
                default_bio: "default bio".to_string(),
            },
            BackgroundTasks::new(16),
        )
    }

    #[test]
    fn test_generated_user_id_format() {
        let id = generate_user_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "u");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_manager_config_from_config() {
        let mut config = Config::default();
        config.retrieval.top_k = 6;
        config.compaction.threshold = 9;
        let manager_config = ManagerConfig::from(&config);
        assert_eq!(manager_config.top_k, 6);
        assert_eq!(manager_config.compaction.threshold, 9);
        assert!(manager_config.default_bio.contains("MemCortex"));
    }

    #[tokio::test]
    async fn test_user_context() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_with(store.clone());

        assert_eq!(manager.get_user_bio("nobody").await.unwrap(), "default bio");

        manager.ensure_user_exists("42").await.unwrap();
        manager.ensure_user_exists("42").await.unwrap();
        let profile = store.profile("42").unwrap();
        assert_eq!(profile.username, "User_42");

        let id = manager.register_user("alice", "Writes Rust").await.unwrap();
        assert!(id.starts_with("u-"));
        assert_eq!(manager.get_user_bio(&id).await.unwrap(), "Writes Rust");

        assert!(manager.register_user("   ", "bio").await.is_err());
    }

    #[tokio::test]
    async fn test_stats_counts_kinds() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_with(store);

        manager.save("u1", "one").await.unwrap();
        manager.save("u1", "two").await.unwrap();
        manager.save("u1", "three").await.unwrap();
        let outcome = manager.summarize_user_memories("u1").await.unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { .. }));

        let stats = manager.stats("u1").await.unwrap();
        assert_eq!(stats, MemoryStats { raw: 1, summaries: 1 });
    }
}
