//! Persistence seams for memories and user profiles
//!
//! [`MemoryStore`] and [`UserDirectory`] are what the manager talks to;
//! [`LanceStore`] implements both on top of LanceDB.

pub mod filter;
pub mod lance;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{MemoryKind, MemoryRecord, UserProfile};

pub use filter::MemoryFilter;
pub use lance::LanceStore;

/// Per-id outcome of a best-effort delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<Uuid> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

/// Memory persistence and nearest-neighbour search.
///
/// Records marked superseded are invisible to `search`,
/// `get_memory_count` and `get_old_memories`.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a new raw memory and return its id
    async fn save(&self, user_id: &str, text: &str, vector: Vec<f32>) -> Result<Uuid>;

    /// Up to `k` records of `user_id` (both kinds), nearest first
    async fn search(&self, vector: &[f32], user_id: &str, k: usize) -> Result<Vec<MemoryRecord>>;

    /// Number of live raw records for `user_id`
    async fn get_memory_count(&self, user_id: &str) -> Result<usize>;

    /// Up to `limit` live raw records older than `max_age_days`, oldest first.
    /// `max_age_days == 0` disables the age filter.
    async fn get_old_memories(
        &self,
        user_id: &str,
        max_age_days: u32,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Persist a summary replacing `original_ids` and return its id
    async fn save_summary(
        &self,
        summary: &str,
        user_id: &str,
        original_ids: &[Uuid],
        vector: Vec<f32>,
    ) -> Result<Uuid>;

    /// Flag `ids` as replaced by `summary_id`; returns rows updated
    async fn mark_superseded(&self, ids: &[Uuid], summary_id: Uuid) -> Result<usize>;

    /// Ids of superseded records still stored for `user_id`
    async fn superseded_ids(&self, user_id: &str) -> Result<Vec<Uuid>>;

    /// Delete each id independently; never retries
    async fn delete_memories(&self, ids: &[Uuid]) -> DeleteReport;

    /// Live records of one kind for `user_id`
    async fn count_by_kind(&self, user_id: &str, kind: MemoryKind) -> Result<usize>;
}

/// User profiles backing the chat context
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The stored bio, or `None` when the user or bio is missing
    async fn get_user_bio(&self, user_id: &str) -> Result<Option<String>>;

    /// Create a placeholder profile if `user_id` is unknown.
    /// Returns true when a profile was created.
    async fn ensure_user(&self, user_id: &str) -> Result<bool>;

    async fn register_user(&self, profile: &UserProfile) -> Result<()>;
}

/// Bio given to profiles created by [`UserDirectory::ensure_user`]
pub const NEW_USER_BIO: &str = "A new user of the MemCortex system.";

/// Username given to profiles created by [`UserDirectory::ensure_user`]
pub fn placeholder_username(user_id: &str) -> String {
    format!("User_{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_report() {
        let ok = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let report = DeleteReport {
            deleted: vec![ok],
            failed: vec![(bad, "locked".to_string())],
        };
        assert!(!report.is_complete());
        assert_eq!(report.failed_ids(), vec![bad]);
        assert!(DeleteReport::default().is_complete());
    }

    #[test]
    fn test_placeholder_username() {
        assert_eq!(placeholder_username("42"), "User_42");
    }
}
