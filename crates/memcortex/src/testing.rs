//! Test doubles for MemCortex
//!
//! Deterministic stand-ins for the three external collaborators:
//! - [`MockEmbeddingGateway`]: hash-based vectors with scriptable rate limiting
//! - [`InMemoryStore`]: a [`MemoryStore`] + [`UserDirectory`] that counts calls
//!   and can be told to fail
//! - [`StubSummarizer`]: joins its input instead of calling a model

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::{EmbeddingError, EmbeddingGateway};
use crate::error::{CortexError, Result};
use crate::memory::types::{MemoryKind, MemoryRecord, UserProfile};
use crate::storage::{
    DeleteReport, MemoryStore, NEW_USER_BIO, UserDirectory, placeholder_username,
};
use crate::summarizer::{SummarizationService, SummarizerError};

/// Deterministic vector for `text`, components in [-1, 1]
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();

    (0..dimension)
        .map(|i| {
            let x = seed
                .wrapping_mul(i as u64 + 1)
                .wrapping_add(0x9e3779b97f4a7c15);
            let normalized = (x as f32) / (u64::MAX as f32);
            (normalized * 2.0) - 1.0
        })
        .collect()
}

/// How [`MockEmbeddingGateway`] answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayBehavior {
    Succeed,
    RateLimitAlways,
    /// Rate limit the next `n` calls, then succeed
    RateLimitTimes(usize),
    FailAlways(String),
    /// Non-retryable failure only for this exact text
    FailOnText(String),
}

/// Gateway double that records how it was called
pub struct MockEmbeddingGateway {
    dimension: usize,
    behavior: Mutex<GatewayBehavior>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEmbeddingGateway {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            behavior: Mutex::new(GatewayBehavior::Succeed),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(self, behavior: GatewayBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    /// Time each call takes
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: GatewayBehavior) {
        *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        hash_embedding(text, self.dimension)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn outcome(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut behavior = self.behavior.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *behavior {
            GatewayBehavior::Succeed => Ok(self.vector_for(text)),
            GatewayBehavior::RateLimitAlways => {
                Err(EmbeddingError::RateLimited("429 Too Many Requests".to_string()))
            }
            GatewayBehavior::RateLimitTimes(remaining) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(EmbeddingError::RateLimited("429 Too Many Requests".to_string()))
                } else {
                    Ok(self.vector_for(text))
                }
            }
            GatewayBehavior::FailAlways(msg) => Err(EmbeddingError::Request(msg.clone())),
            GatewayBehavior::FailOnText(target) if target == text => {
                Err(EmbeddingError::Request(format!("cannot embed {text:?}")))
            }
            GatewayBehavior::FailOnText(_) => Ok(self.vector_for(text)),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for MockEmbeddingGateway {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self.outcome(text);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Snapshot of how often each [`MemoryStore`] method was called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub save: usize,
    pub search: usize,
    pub get_memory_count: usize,
    pub get_old_memories: usize,
    pub save_summary: usize,
    pub mark_superseded: usize,
    pub superseded_ids: usize,
    pub delete_memories: usize,
}

impl StoreCalls {
    /// Calls that add or change records
    pub fn writes(&self) -> usize {
        self.save + self.save_summary + self.mark_superseded
    }
}

#[derive(Debug, Default)]
struct Failures {
    search: bool,
    save: bool,
    save_summary: bool,
    mark_superseded: bool,
    delete_ids: HashSet<Uuid>,
}

/// In-process store with call counting and failure injection
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<MemoryRecord>>,
    users: Mutex<HashMap<String, UserProfile>>,
    calls: Mutex<StoreCalls>,
    failures: Mutex<Failures>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> StoreCalls {
        *lock(&self.calls)
    }

    pub fn reset_calls(&self) {
        *lock(&self.calls) = StoreCalls::default();
    }

    /// Insert a prebuilt record without counting it as a call
    pub fn insert(&self, record: MemoryRecord) {
        lock(&self.records).push(record);
    }

    /// Every stored record, superseded ones included
    pub fn all_records(&self) -> Vec<MemoryRecord> {
        lock(&self.records).clone()
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryRecord> {
        lock(&self.records).iter().find(|r| r.id() == id).cloned()
    }

    pub fn summaries_for(&self, user_id: &str) -> Vec<MemoryRecord> {
        lock(&self.records)
            .iter()
            .filter(|r| r.user_id() == user_id && r.kind() == MemoryKind::Summary)
            .cloned()
            .collect()
    }

    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        lock(&self.users).get(user_id).cloned()
    }

    pub fn fail_search(&self, fail: bool) {
        lock(&self.failures).search = fail;
    }

    pub fn fail_save(&self, fail: bool) {
        lock(&self.failures).save = fail;
    }

    pub fn fail_save_summary(&self, fail: bool) {
        lock(&self.failures).save_summary = fail;
    }

    pub fn fail_mark_superseded(&self, fail: bool) {
        lock(&self.failures).mark_superseded = fail;
    }

    /// Make deletion of these ids fail until cleared
    pub fn fail_delete_for(&self, ids: &[Uuid]) {
        lock(&self.failures).delete_ids = ids.iter().copied().collect();
    }

    fn count_call(&self, update: impl FnOnce(&mut StoreCalls)) {
        update(&mut lock(&self.calls));
    }

    fn injected(&self, check: impl FnOnce(&Failures) -> bool, what: &str) -> Result<()> {
        if check(&lock(&self.failures)) {
            return Err(CortexError::Storage(format!("injected {what} failure")));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn save(&self, user_id: &str, text: &str, vector: Vec<f32>) -> Result<Uuid> {
        self.count_call(|c| c.save += 1);
        self.injected(|f| f.save, "save")?;

        let record = MemoryRecord::raw(user_id, text, vector);
        let id = record.id();
        lock(&self.records).push(record);
        Ok(id)
    }

    async fn search(&self, vector: &[f32], user_id: &str, k: usize) -> Result<Vec<MemoryRecord>> {
        self.count_call(|c| c.search += 1);
        self.injected(|f| f.search, "search")?;

        let mut scored: Vec<(f32, MemoryRecord)> = lock(&self.records)
            .iter()
            .filter(|r| r.user_id() == user_id && !r.is_superseded())
            .map(|r| (cosine_similarity(vector, r.embedding()), r.clone()))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, r)| r).collect())
    }

    async fn get_memory_count(&self, user_id: &str) -> Result<usize> {
        self.count_call(|c| c.get_memory_count += 1);

        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.user_id() == user_id && r.kind() == MemoryKind::Raw && !r.is_superseded())
            .count())
    }

    async fn get_old_memories(
        &self,
        user_id: &str,
        max_age_days: u32,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        self.count_call(|c| c.get_old_memories += 1);

        let cutoff = (max_age_days > 0)
            .then(|| Utc::now() - chrono::Duration::days(i64::from(max_age_days)));

        let mut records: Vec<MemoryRecord> = lock(&self.records)
            .iter()
            .filter(|r| r.user_id() == user_id && r.kind() == MemoryKind::Raw && !r.is_superseded())
            .filter(|r| cutoff.is_none_or(|cutoff| r.created_at() < cutoff))
            .cloned()
            .collect();

        records.sort_by_key(|r| r.created_at());
        records.truncate(limit);
        Ok(records)
    }

    async fn save_summary(
        &self,
        summary: &str,
        user_id: &str,
        original_ids: &[Uuid],
        vector: Vec<f32>,
    ) -> Result<Uuid> {
        self.count_call(|c| c.save_summary += 1);
        self.injected(|f| f.save_summary, "save_summary")?;

        let record = MemoryRecord::summary(user_id, summary, original_ids.to_vec(), vector);
        let id = record.id();
        lock(&self.records).push(record);
        Ok(id)
    }

    async fn mark_superseded(&self, ids: &[Uuid], summary_id: Uuid) -> Result<usize> {
        self.count_call(|c| c.mark_superseded += 1);
        self.injected(|f| f.mark_superseded, "mark_superseded")?;

        let mut marked = 0;
        for record in lock(&self.records).iter_mut() {
            if ids.contains(&record.id()) {
                record.set_superseded_by(summary_id);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn superseded_ids(&self, user_id: &str) -> Result<Vec<Uuid>> {
        self.count_call(|c| c.superseded_ids += 1);

        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.user_id() == user_id && r.is_superseded())
            .map(|r| r.id())
            .collect())
    }

    async fn delete_memories(&self, ids: &[Uuid]) -> DeleteReport {
        self.count_call(|c| c.delete_memories += 1);

        let failing = lock(&self.failures).delete_ids.clone();
        let mut records = lock(&self.records);
        let mut report = DeleteReport::default();

        for id in ids {
            if failing.contains(id) {
                report.failed.push((*id, "injected delete failure".to_string()));
            } else {
                records.retain(|r| r.id() != *id);
                report.deleted.push(*id);
            }
        }
        report
    }

    async fn count_by_kind(&self, user_id: &str, kind: MemoryKind) -> Result<usize> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.user_id() == user_id && r.kind() == kind && !r.is_superseded())
            .count())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn get_user_bio(&self, user_id: &str) -> Result<Option<String>> {
        Ok(lock(&self.users)
            .get(user_id)
            .map(|p| p.bio.clone())
            .filter(|bio| !bio.trim().is_empty()))
    }

    async fn ensure_user(&self, user_id: &str) -> Result<bool> {
        let mut users = lock(&self.users);
        if users.contains_key(user_id) {
            return Ok(false);
        }
        users.insert(
            user_id.to_string(),
            UserProfile::new(user_id, placeholder_username(user_id), NEW_USER_BIO),
        );
        Ok(true)
    }

    async fn register_user(&self, profile: &UserProfile) -> Result<()> {
        let mut users = lock(&self.users);
        if users.contains_key(&profile.user_id) {
            return Err(CortexError::Memory(format!(
                "user {} already exists",
                profile.user_id
            )));
        }
        users.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}

/// Summarizer double: joins the batch, or fails on request
#[derive(Default)]
pub struct StubSummarizer {
    failure: Mutex<Option<String>>,
    delay: Duration,
    batches: Mutex<Vec<Vec<String>>>,
}

impl StubSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        let stub = Self::default();
        stub.set_failure(Some(message.into()));
        stub
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failure(&self, failure: Option<String>) {
        *lock(&self.failure) = failure;
    }

    /// Every batch passed to `summarize`, in call order
    pub fn batches(&self) -> Vec<Vec<String>> {
        lock(&self.batches).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.batches).len()
    }

    /// The summary produced for `memories`
    pub fn expected_summary(memories: &[String]) -> String {
        format!("Summary: {}", memories.join(" | "))
    }
}

#[async_trait]
impl SummarizationService for StubSummarizer {
    async fn summarize(
        &self,
        memories: &[String],
        _user_id: &str,
    ) -> std::result::Result<String, SummarizerError> {
        lock(&self.batches).push(memories.to_vec());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if memories.is_empty() {
            return Err(SummarizerError::EmptyBatch);
        }
        if let Some(message) = lock(&self.failure).clone() {
            return Err(SummarizerError::ApiError(message));
        }
        Ok(Self::expected_summary(memories))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
