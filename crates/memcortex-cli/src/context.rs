//! Wiring of the memory pipeline for one CLI invocation

use std::sync::Arc;

use memcortex::config::Config;
use memcortex::embedding::local::LOCAL_EMBEDDING_DIMENSION;
use memcortex::embedding::{
    EmbeddingGateway, EmbeddingQueue, LocalEmbedder, OllamaEmbedder, QueueConfig,
};
use memcortex::memory::{BackgroundTasks, ManagerConfig, MemoryManager};
use memcortex::storage::LanceStore;
use memcortex::summarizer::OllamaSummarizer;
use tracing::{info, warn};

use crate::error::CliResult;

/// Everything a command needs, built from the loaded config
pub struct CortexContext {
    pub config: Config,
    pub manager: MemoryManager,
}

impl CortexContext {
    pub async fn build(config: Config) -> CliResult<Self> {
        let data_dir = &config.storage.data_dir;
        std::fs::create_dir_all(data_dir).map_err(|e| {
            format!(
                "Failed to create data directory {}: {}",
                data_dir.display(),
                e
            )
        })?;

        let (gateway, dimension): (Arc<dyn EmbeddingGateway>, usize) =
            match config.embedding.provider.as_str() {
                "local" => {
                    if config.embedding.dimension != LOCAL_EMBEDDING_DIMENSION {
                        warn!(
                            "Local embeddings are {}-dimensional; ignoring embedding.dimension = {}",
                            LOCAL_EMBEDDING_DIMENSION, config.embedding.dimension
                        );
                    }
                    let gateway: Arc<dyn EmbeddingGateway> = Arc::new(LocalEmbedder::new()?);
                    (gateway, LOCAL_EMBEDDING_DIMENSION)
                }
                _ => {
                    let gateway: Arc<dyn EmbeddingGateway> =
                        Arc::new(OllamaEmbedder::new(&config.embedding)?);
                    (gateway, config.embedding.dimension)
                }
            };
        info!("Using {} embeddings ({} dimensions)", gateway.name(), dimension);

        let store = Arc::new(LanceStore::open(data_dir, dimension).await?);

        let queue_config = QueueConfig {
            dimension,
            ..QueueConfig::from(&config.embedding)
        };
        let embedder = Arc::new(EmbeddingQueue::new(gateway, queue_config));

        let summarizer = Arc::new(OllamaSummarizer::new(&config.summarizer)?);

        let manager = MemoryManager::new(
            store.clone(),
            store,
            embedder,
            summarizer,
            ManagerConfig::from(&config),
            BackgroundTasks::new(config.background.capacity),
        );

        Ok(Self { config, manager })
    }

    /// Finish queued background work and stop the embedding workers
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
