//! Summarization of memory batches
//!
//! Compaction hands a batch of memory texts to a [`SummarizationService`]
//! and stores whatever single string comes back.

pub mod ollama;
pub mod prompts;

use async_trait::async_trait;

use crate::ollama::OllamaError;

pub use ollama::OllamaSummarizer;

/// Summarization errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("No memories to summarize")]
    EmptyBatch,
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Model returned an empty summary")]
    EmptyResponse,
}

impl From<OllamaError> for SummarizerError {
    fn from(e: OllamaError) -> Self {
        match e {
            OllamaError::Parse(msg) => SummarizerError::ParseError(msg),
            other => SummarizerError::ApiError(other.to_string()),
        }
    }
}

/// Trait for summarization backends
#[async_trait]
pub trait SummarizationService: Send + Sync {
    /// Fold `memories` into one summary for `user_id`
    async fn summarize(&self, memories: &[String], user_id: &str)
    -> Result<String, SummarizerError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
