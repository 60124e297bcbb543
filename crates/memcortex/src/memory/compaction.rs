//! Compaction policy, outcomes and per-user serialization
//!
//! Compaction folds a user's oldest raw memories into one summary record.
//! The steps themselves live on [`MemoryManager`](crate::memory::MemoryManager);
//! this module holds what they are configured with and what they report.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::CompactionSettings;

/// Thresholds for compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Whether `check_and_summarize` does anything at all
    pub enabled: bool,
    /// Live raw count at which compaction starts (default: 2)
    pub threshold: usize,
    /// Raw memories folded per summary (default: 2)
    pub batch_size: usize,
    /// Only memories older than this are eligible; 0 disables the filter
    pub max_age_days: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self::from(&CompactionSettings::default())
    }
}

impl From<&CompactionSettings> for CompactionConfig {
    fn from(settings: &CompactionSettings) -> Self {
        Self {
            enabled: settings.enabled,
            threshold: settings.threshold,
            batch_size: settings.batch_size,
            max_age_days: settings.max_age_days,
        }
    }
}

impl CompactionConfig {
    pub fn new(threshold: usize, batch_size: usize) -> Self {
        Self {
            threshold,
            batch_size,
            ..Default::default()
        }
    }

    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = days;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// What a compaction run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompactionOutcome {
    /// Auto-compaction is switched off
    Disabled,
    BelowThreshold { count: usize, threshold: usize },
    /// No raw memory is old enough
    NothingToCompact,
    /// Summary written and every original removed
    Compacted { summary_id: Uuid, replaced: Vec<Uuid> },
    /// Summary written; some originals could not be deleted and stay
    /// hidden until the next sweep
    PartiallyCompacted {
        summary_id: Uuid,
        deleted: Vec<Uuid>,
        undeleted: Vec<Uuid>,
    },
}

impl CompactionOutcome {
    /// The summary written by this run, if any
    pub fn summary_id(&self) -> Option<Uuid> {
        match self {
            CompactionOutcome::Compacted { summary_id, .. }
            | CompactionOutcome::PartiallyCompacted { summary_id, .. } => Some(*summary_id),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CompactionOutcome::Disabled => "auto-compaction disabled".to_string(),
            CompactionOutcome::BelowThreshold { count, threshold } => {
                format!("{count} raw memories, threshold {threshold}")
            }
            CompactionOutcome::NothingToCompact => "nothing eligible to compact".to_string(),
            CompactionOutcome::Compacted { replaced, .. } => {
                format!("compacted {} memories", replaced.len())
            }
            CompactionOutcome::PartiallyCompacted {
                deleted, undeleted, ..
            } => format!(
                "compacted {} memories, {} left for sweep",
                deleted.len(),
                undeleted.len()
            ),
        }
    }
}

/// One async mutex per user id.
///
/// Holding a user's guard serializes compaction and sweeps for that user
/// without blocking anyone else. An entry lives only while some caller holds
/// or waits for it, so the map is bounded by the users in flight.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held lock for one user; dropping it releases the lock
#[derive(Debug)]
pub struct UserGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        // release first so our own Arc no longer counts
        self.guard.take();
        // the shard lock keeps this atomic with `acquire` cloning the entry
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take `user_id`'s lock
    pub async fn acquire(&self, user_id: &str) -> UserGuard<'_> {
        let lock = self.locks.entry(user_id.to_string()).or_default().clone();
        let mut guard = UserGuard {
            locks: &self.locks,
            user_id: user_id.to_string(),
            guard: None,
        };
        // a cancelled wait still drops `guard` and prunes the entry
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// True while someone holds `user_id`'s lock
    pub fn is_locked(&self, user_id: &str) -> bool {
        self.locks
            .get(user_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Users with a held or awaited lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_from_settings() {
        let settings = CompactionSettings {
            enabled: false,
            threshold: 10,
            batch_size: 4,
            max_age_days: 7,
        };
        let config = CompactionConfig::from(&settings);
        assert!(!config.enabled);
        assert_eq!(config.threshold, 10);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.max_age_days, 7);
    }

    #[test]
    fn test_config_defaults() {
        let config = CompactionConfig::default();
        assert!(config.enabled);
        assert_eq!((config.threshold, config.batch_size, config.max_age_days), (2, 2, 0));
        assert!(!CompactionConfig::new(3, 3).disabled().enabled);
    }

    #[test]
    fn test_outcome_summary_id() {
        let id = Uuid::new_v4();
        let done = CompactionOutcome::Compacted {
            summary_id: id,
            replaced: vec![],
        };
        assert_eq!(done.summary_id(), Some(id));
        assert_eq!(CompactionOutcome::NothingToCompact.summary_id(), None);
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let json = serde_json::to_value(CompactionOutcome::BelowThreshold {
            count: 1,
            threshold: 2,
        })
        .unwrap();
        assert_eq!(json["status"], "below_threshold");
        assert_eq!(json["count"], 1);
    }

    #[tokio::test]
    async fn test_user_locks_are_per_user() {
        let locks = UserLocks::new();
        let guard = locks.acquire("u1").await;

        assert!(locks.is_locked("u1"));
        assert!(!locks.is_locked("u2"));

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("u2")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire("u1")).await;
        assert!(same.is_err());

        drop(guard);
        assert!(!locks.is_locked("u1"));
    }

    #[tokio::test]
    async fn test_user_locks_forget_idle_users() {
        let locks = UserLocks::new();

        for i in 0..50 {
            let _guard = locks.acquire(&format!("user-{i}")).await;
        }
        assert!(locks.is_empty());

        let held = locks.acquire("u1").await;
        let waiter = tokio::time::timeout(Duration::from_millis(20), locks.acquire("u1")).await;
        assert!(waiter.is_err());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_user_lock_entry_survives_while_waited_on() {
        let locks = Arc::new(UserLocks::new());
        let first = locks.acquire("u1").await;

        let waiting = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("u1").await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the waiter still needs the same mutex
        drop(first);
        assert_eq!(locks.len(), 1);

        assert_eq!(waiting.await.unwrap(), 1);
        assert!(locks.is_empty());
    }
}
