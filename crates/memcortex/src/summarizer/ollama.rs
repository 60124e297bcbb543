//! Ollama-backed summarizer

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SummarizerConfig;
use crate::ollama::{OllamaClient, strip_think_tags};
use crate::summarizer::prompts::build_summary_prompt;
use crate::summarizer::{SummarizationService, SummarizerError};

/// Summarizes through `/api/generate` with a reasoning-capable model
#[derive(Debug, Clone)]
pub struct OllamaSummarizer {
    client: OllamaClient,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self, SummarizerError> {
        let client = OllamaClient::new(&config.base_url, Duration::from_secs(config.timeout_secs))?;

        info!(
            "OllamaSummarizer initialized with model: {}, base_url: {}",
            config.model, config.base_url
        );

        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl SummarizationService for OllamaSummarizer {
    async fn summarize(
        &self,
        memories: &[String],
        user_id: &str,
    ) -> Result<String, SummarizerError> {
        if memories.is_empty() {
            return Err(SummarizerError::EmptyBatch);
        }

        info!(
            "Summarizing {} memories for user {} with {}",
            memories.len(),
            user_id,
            self.model
        );

        let prompt = build_summary_prompt(memories, user_id);
        let raw = self.client.generate(&self.model, &prompt).await?;
        let summary = strip_think_tags(&raw);

        if summary.is_empty() {
            return Err(SummarizerError::EmptyResponse);
        }

        debug!("Summary for {}: {} chars", user_id, summary.len());
        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
