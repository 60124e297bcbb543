//! Memory types for MemCortex
//!
//! A user's memory log is a list of [`MemoryRecord`]s. Raw records hold one
//! chat turn each; summary records replace a batch of raw records and carry
//! the ids they replaced.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CortexError, Result};

/// Whether a record is an original turn or a compaction summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Raw,
    Summary,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Raw => "raw",
            MemoryKind::Summary => "summary",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(MemoryKind::Raw),
            "summary" => Ok(MemoryKind::Summary),
            other => Err(CortexError::Memory(format!("Unknown memory kind: {other}"))),
        }
    }
}

/// A single stored memory.
///
/// Built only through [`MemoryRecord::raw`] and [`MemoryRecord::summary`],
/// which keeps `original_ids` empty for raw records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRecord {
    id: Uuid,
    user_id: String,
    content: String,
    created_at: DateTime<Utc>,
    kind: MemoryKind,
    original_ids: Vec<Uuid>,
    #[serde(skip_serializing)]
    embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    superseded_by: Option<Uuid>,
}

impl MemoryRecord {
    /// A new raw memory stamped with a fresh id and the current time
    pub fn raw(user_id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            content: content.into(),
            created_at: Utc::now(),
            kind: MemoryKind::Raw,
            original_ids: Vec::new(),
            embedding,
            superseded_by: None,
        }
    }

    /// A new summary replacing `original_ids`
    pub fn summary(
        user_id: impl Into<String>,
        content: impl Into<String>,
        original_ids: Vec<Uuid>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            content: content.into(),
            created_at: Utc::now(),
            kind: MemoryKind::Summary,
            original_ids,
            embedding,
            superseded_by: None,
        }
    }

    /// Rebuild a stored record, checking the kind/original_ids invariant
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        user_id: String,
        content: String,
        created_at: DateTime<Utc>,
        kind: MemoryKind,
        original_ids: Vec<Uuid>,
        embedding: Vec<f32>,
        superseded_by: Option<Uuid>,
    ) -> Result<Self> {
        if kind == MemoryKind::Raw && !original_ids.is_empty() {
            return Err(CortexError::Storage(format!(
                "raw memory {id} lists {} original ids",
                original_ids.len()
            )));
        }
        Ok(Self {
            id,
            user_id,
            content,
            created_at,
            kind,
            original_ids,
            embedding,
            superseded_by,
        })
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub(crate) fn set_superseded_by(&mut self, summary_id: Uuid) {
        self.superseded_by = Some(summary_id);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn original_ids(&self) -> &[Uuid] {
        &self.original_ids
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn superseded_by(&self) -> Option<Uuid> {
        self.superseded_by
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// Prompt-ready view of a memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryPrompt {
    pub text: String,
    /// RFC 3339 creation time
    pub added: String,
}

impl From<&MemoryRecord> for MemoryPrompt {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            text: record.content.clone(),
            added: record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Project up to `limit` records, in the order given, into prompt entries
pub fn format_memory_prompt(records: &[MemoryRecord], limit: usize) -> Vec<MemoryPrompt> {
    records.iter().take(limit).map(MemoryPrompt::from).collect()
}

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        bio: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            bio: bio.into(),
            created_at: Utc::now(),
        }
    }
}
