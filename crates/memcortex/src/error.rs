//! Error types for MemCortex

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::summarizer::SummarizerError;

/// Main error type for MemCortex operations
#[derive(Error, Debug)]
pub enum CortexError {
    /// Storage-related errors (LanceDB, schema, row decoding)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Summary generation errors
    #[error("Summarization error: {0}")]
    Summarization(#[from] SummarizerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Memory lifecycle errors (compaction, ingestion)
    #[error("Memory error: {0}")]
    Memory(String),

    /// Worker pool / background queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

/// Result type alias for MemCortex operations
pub type Result<T> = std::result::Result<T, CortexError>;
