//! Minimal Ollama HTTP client
//!
//! Wraps the two endpoints MemCortex needs: `/api/embeddings` for vectors
//! and `/api/generate` for non-streaming text generation.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Errors returned by the Ollama API
#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP client bound to one Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: Url,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OllamaError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| OllamaError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OllamaError::Request(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, OllamaError> {
        self.base_url
            .join(path)
            .map_err(|e| OllamaError::InvalidUrl(e.to_string()))
    }

    /// Embed `prompt` with `model`, narrowing the returned floats to f32
    pub async fn embed(&self, model: &str, prompt: &str) -> Result<Vec<f32>, OllamaError> {
        let url = self.endpoint("api/embeddings")?;
        debug!("Requesting embedding from {}", url);

        let response = self
            .client
            .post(url)
            .json(&EmbeddingRequest { model, prompt })
            .send()
            .await
            .map_err(|e| OllamaError::Request(e.to_string()))?;

        let response = Self::check_status(response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::Parse(format!("invalid embedding json: {e}")))?;

        Ok(parsed.embedding.into_iter().map(|v| v as f32).collect())
    }

    /// Run a single non-streaming generation
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        let url = self.endpoint("api/generate")?;
        debug!("Calling {} with model {}", url, model);

        let response = self
            .client
            .post(url)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| OllamaError::Request(e.to_string()))?;

        let response = Self::check_status(response).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::Parse(format!("failed to decode response: {e}")))?;

        Ok(parsed.response)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, OllamaError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OllamaError::RateLimited(format!("{status}: {body}")));
        }

        Err(OllamaError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// Remove `<think>...</think>` blocks emitted by reasoning models
pub fn strip_think_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    out.trim().to_string()
}
