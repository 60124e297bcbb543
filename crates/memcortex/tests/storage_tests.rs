//! Integration tests for the LanceDB-backed store
//!
//! Runs the full memory lifecycle against real tables in a temporary
//! directory.

use std::sync::Arc;
use std::time::Duration;

use memcortex::embedding::{EmbeddingQueue, QueueConfig};
use memcortex::memory::{
    BackgroundTasks, CompactionConfig, CompactionOutcome, ManagerConfig, MemoryKind,
    MemoryManager,
};
use memcortex::storage::{LanceStore, MemoryStore, UserDirectory};
use memcortex::testing::{MockEmbeddingGateway, StubSummarizer};
use tempfile::tempdir;

const DIM: usize = 8;

/// Test fixture: manager over a fresh LanceStore in a temporary directory
async fn create_test_manager(
    compaction: CompactionConfig,
) -> (MemoryManager, Arc<LanceStore>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = Arc::new(LanceStore::open(dir.path(), DIM).await.unwrap());

    let queue = EmbeddingQueue::new(
        Arc::new(MockEmbeddingGateway::new(DIM)),
        QueueConfig {
            workers: 2,
            capacity: 16,
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
            dimension: DIM,
        },
    );

    let manager = MemoryManager::new(
        store.clone(),
        store.clone(),
        Arc::new(queue),
        Arc::new(StubSummarizer::new()),
        ManagerConfig {
            top_k: 5,
            compaction,
            default_bio: "A test bio".to_string(),
        },
        BackgroundTasks::new(16),
    );

    (manager, store, dir)
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_recall() {
        let (manager, store, _dir) = create_test_manager(CompactionConfig::new(100, 2)).await;

        let id = manager.save("u1", "The deploy key lives in vault").await.unwrap();
        manager.save("u1", "Lunch is at noon").await.unwrap();

        let results = manager.retrieve("u1", "The deploy key lives in vault").await;
        assert_eq!(results[0].id(), id);
        assert_eq!(results[0].kind(), MemoryKind::Raw);
        assert_eq!(store.get_memory_count("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hello_world_compaction() {
        let (manager, store, _dir) = create_test_manager(CompactionConfig::new(2, 2)).await;
        let hello = manager.save("u1", "hello").await.unwrap();
        let world = manager.save("u1", "world").await.unwrap();

        let outcome = manager.check_and_summarize("u1").await.unwrap();
        let summary_id = match outcome {
            CompactionOutcome::Compacted {
                summary_id,
                replaced,
            } => {
                assert_eq!(replaced.len(), 2);
                summary_id
            }
            other => panic!("expected compaction, got {other:?}"),
        };

        let summary = store.get(summary_id).await.unwrap().unwrap();
        assert_eq!(summary.kind(), MemoryKind::Summary);
        assert!(summary.original_ids().contains(&hello));
        assert!(summary.original_ids().contains(&world));

        assert!(store.get_old_memories("u1", 0, 10).await.unwrap().is_empty());
        assert!(store.get(hello).await.unwrap().is_none());
        assert_eq!(store.count_by_kind("u1", MemoryKind::Summary).await.unwrap(), 1);
        assert_eq!(store.get_memory_count("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_interaction_persists_turns() {
        let (manager, store, _dir) = create_test_manager(CompactionConfig::new(100, 2)).await;

        manager
            .record_interaction("u1", "Remind me about the dentist", "Will do.")
            .await
            .wait()
            .await
            .unwrap();

        let old = store.get_old_memories("u1", 0, 10).await.unwrap();
        let contents: Vec<&str> = old.iter().map(|r| r.content()).collect();
        assert!(contents.contains(&"Remind me about the dentist"));
        assert!(contents.contains(&"AI: Will do."));
    }

    #[tokio::test]
    async fn test_memories_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = LanceStore::open(dir.path(), DIM).await.unwrap();
            store.save("u1", "persisted", vec![0.25; DIM]).await.unwrap()
        };

        let reopened = LanceStore::open(dir.path(), DIM).await.unwrap();
        let record = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(record.content(), "persisted");
        assert_eq!(record.embedding(), &[0.25; DIM]);
    }
}

mod user_directory_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_context_through_manager() {
        let (manager, store, _dir) = create_test_manager(CompactionConfig::default()).await;

        assert_eq!(manager.get_user_bio("nobody").await.unwrap(), "A test bio");

        manager.ensure_user_exists("42").await.unwrap();
        assert!(!store.ensure_user("42").await.unwrap());

        let id = manager.register_user("grace", "Compiler pioneer").await.unwrap();
        assert_eq!(manager.get_user_bio(&id).await.unwrap(), "Compiler pioneer");
    }
}
