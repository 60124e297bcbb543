//! Embedding generation
//!
//! The [`EmbeddingGateway`] trait is the seam to whatever turns text into a
//! vector. [`EmbeddingQueue`] puts a bounded worker pool with rate-limit
//! retries in front of a gateway.

pub mod local;
pub mod ollama;
pub mod queue;

use async_trait::async_trait;

use crate::ollama::OllamaError;

pub use local::LocalEmbedder;
pub use ollama::OllamaEmbedder;
pub use queue::{EmbeddingJob, EmbeddingQueue, QueueConfig};

/// Embedding-specific errors
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Upstream asked us to slow down; retryable
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, EmbeddingError::RateLimited(_))
    }
}

impl From<OllamaError> for EmbeddingError {
    fn from(e: OllamaError) -> Self {
        match e {
            OllamaError::RateLimited(msg) => EmbeddingError::RateLimited(msg),
            OllamaError::Parse(msg) => EmbeddingError::InvalidResponse(msg),
            other => EmbeddingError::Request(other.to_string()),
        }
    }
}

/// Trait for embedding backends (remote API, in-process model)
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Turn `text` into a vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Gateway name for logging
    fn name(&self) -> &'static str;
}

/// A vector produced by the queue
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// True when `vector` is the placeholder from [`fallback_vector`]
    pub degraded: bool,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            degraded: false,
        }
    }

    pub fn fallback(text: &str, dimension: usize) -> Self {
        Self {
            vector: fallback_vector(text, dimension),
            degraded: true,
        }
    }
}

/// Deterministic placeholder used when the gateway keeps rate limiting.
///
/// Every component is `text.len() / dimension`; it carries no meaning.
pub fn fallback_vector(text: &str, dimension: usize) -> Vec<f32> {
    if dimension == 0 {
        return Vec::new();
    }
    let value = text.len() as f32 / dimension as f32;
    vec![value; dimension]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_vector_depends_only_on_length() {
        let a = fallback_vector("hello", 768);
        let b = fallback_vector("world", 768);
        assert_eq!(a, b);
        assert_eq!(a.len(), 768);
        assert!((a[0] - 5.0 / 768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_fallback_vector_zero_dimension() {
        assert!(fallback_vector("hello", 0).is_empty());
    }

    #[test]
    fn test_fallback_embedding_is_degraded() {
        let embedding = Embedding::fallback("abc", 4);
        assert!(embedding.degraded);
        assert_eq!(embedding.vector, vec![0.75; 4]);
        assert!(!Embedding::new(vec![1.0]).degraded);
    }

    #[test]
    fn test_ollama_error_mapping() {
        let err: EmbeddingError = OllamaError::RateLimited("429".to_string()).into();
        assert!(err.is_rate_limited());

        let err: EmbeddingError = OllamaError::Api {
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert!(!err.is_rate_limited());
        assert!(err.to_string().contains("500"));

        let err: EmbeddingError = OllamaError::Parse("bad".to_string()).into();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }
}
