//! Bounded embedding worker pool
//!
//! A fixed number of workers drain one shared bounded channel. Each job is
//! retried on rate limiting with a linear backoff and, when every attempt was
//! rate limited, answered with the fallback vector instead of an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::{Embedding, EmbeddingError, EmbeddingGateway};
use crate::error::{CortexError, Result};

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of workers (fixed for the queue's lifetime)
    pub workers: usize,
    /// Backlog size; producers wait once it is full
    pub capacity: usize,
    /// Gateway attempts per job
    pub max_attempts: u32,
    /// Linear backoff unit; attempt `n` waits `(n + 1) * 2` units
    pub backoff_unit: Duration,
    /// Dimension of the fallback vector
    pub dimension: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for QueueConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            workers: config.workers,
            capacity: config.queue_capacity,
            max_attempts: config.max_attempts,
            backoff_unit: config.backoff_unit(),
            dimension: config.dimension,
        }
    }
}

/// One embedding request, consumed exactly once by a worker
#[derive(Debug)]
pub struct EmbeddingJob {
    pub user_id: String,
    pub text: String,
    reply: oneshot::Sender<Result<Embedding>>,
}

/// Embedding worker pool in front of an [`EmbeddingGateway`]
pub struct EmbeddingQueue {
    sender: RwLock<Option<mpsc::Sender<EmbeddingJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: QueueConfig,
}

impl EmbeddingQueue {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn new(gateway: Arc<dyn EmbeddingGateway>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&gateway),
                    config.clone(),
                ))
            })
            .collect();

        debug!(
            "Embedding queue started with {} workers via {} gateway",
            config.workers.max(1),
            gateway.name()
        );

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Submit `text` and wait for a worker to embed it.
    ///
    /// Waits for backlog space when the queue is full. Returns a
    /// `degraded` embedding when the gateway stayed rate limited.
    pub async fn enqueue(&self, user_id: &str, text: &str) -> Result<Embedding> {
        let sender = self
            .sender
            .read()
            .await
            .clone()
            .ok_or_else(queue_closed)?;

        let (reply, response) = oneshot::channel();
        let job = EmbeddingJob {
            user_id: user_id.to_string(),
            text: text.to_string(),
            reply,
        };

        sender.send(job).await.map_err(|_| queue_closed())?;
        drop(sender);

        response
            .await
            .map_err(|_| CortexError::Queue("embedding worker dropped the job".to_string()))?
    }

    /// Stop accepting jobs, let the workers drain the backlog, and wait for them
    pub async fn close(&self) {
        self.sender.write().await.take();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Embedding worker ended abnormally: {}", e);
            }
        }
        debug!("Embedding queue closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.sender.read().await.is_none()
    }
}

fn queue_closed() -> CortexError {
    CortexError::Queue("embedding queue is closed".to_string())
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<EmbeddingJob>>>,
    gateway: Arc<dyn EmbeddingGateway>,
    config: QueueConfig,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        let result = match embed_with_retry(
            gateway.as_ref(),
            &job.text,
            config.max_attempts,
            config.backoff_unit,
        )
        .await
        {
            Ok(vector) => Ok(Embedding::new(vector)),
            Err(e) if e.is_rate_limited() => {
                warn!(
                    "Embedding for user {} still rate limited after {} attempts, using fallback vector: {}",
                    job.user_id, config.max_attempts, e
                );
                Ok(Embedding::fallback(&job.text, config.dimension))
            }
            Err(e) => Err(CortexError::Embedding(e)),
        };

        // The caller may have gone away; nothing to do then.
        let _ = job.reply.send(result);
    }

    debug!("Embedding worker {} stopped", worker_id);
}

/// Call the gateway up to `max_attempts` times.
///
/// Rate limiting waits `(attempt + 1) * 2 * backoff_unit` before the next
/// attempt; any other error is returned immediately.
pub async fn embed_with_retry(
    gateway: &dyn EmbeddingGateway,
    text: &str,
    max_attempts: u32,
    backoff_unit: Duration,
) -> std::result::Result<Vec<f32>, EmbeddingError> {
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match gateway.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) if e.is_rate_limited() => {
                if attempt + 1 < max_attempts {
                    let wait = backoff_delay(backoff_unit, attempt);
                    warn!(
                        "Rate limited on attempt {}/{}, waiting {:?}",
                        attempt + 1,
                        max_attempts,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| EmbeddingError::Request("no attempts made".to_string())))
}

/// Wait after the rate-limited `attempt` (0-based), saturating instead of
/// overflowing for huge units
fn backoff_delay(backoff_unit: Duration, attempt: u32) -> Duration {
    backoff_unit.saturating_mul(attempt.saturating_add(1).saturating_mul(2))
}
