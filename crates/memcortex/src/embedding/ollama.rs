//! Ollama-backed embedding gateway

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingError, EmbeddingGateway};
use crate::ollama::OllamaClient;

/// Embeds text through an Ollama server's `/api/embeddings`
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = OllamaClient::new(&config.base_url, Duration::from_secs(config.timeout_secs))?;

        info!(
            "OllamaEmbedder initialized with model: {}, base_url: {}",
            config.model, config.base_url
        );

        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    pub fn with_client(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self.client.embed(&self.model, text).await?;
        if vector.is_empty() {
            return Err(EmbeddingError::InvalidResponse(
                "empty embedding returned".to_string(),
            ));
        }
        Ok(vector)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
