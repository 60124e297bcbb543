//! In-process embedding gateway backed by fastembed

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use crate::embedding::{EmbeddingError, EmbeddingGateway};

/// Output dimension of multilingual-e5-small
pub const LOCAL_EMBEDDING_DIMENSION: usize = 384;

/// Runs multilingual-e5-small on the blocking thread pool.
///
/// Never rate limited, so the queue's retry path is only exercised by
/// remote gateways.
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new() -> Result<Self, EmbeddingError> {
        let model = TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
            .map_err(|e| EmbeddingError::Request(format!("Failed to load model: {e}")))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl EmbeddingGateway for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Request("embedding model lock poisoned".to_string()))?;
            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Request(e.to_string()))?;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Request(format!("embedding task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
