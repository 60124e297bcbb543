//! Memory-augmented chat
//!
//! One turn: recall what we know about the user, answer with it in the
//! prompt, then hand the exchange back to the memory pipeline in the
//! background.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CortexError, Result};
use crate::memory::{MemoryManager, MemoryPrompt, TaskHandle, format_memory_prompt};
use crate::ollama::{OllamaClient, strip_think_tags};
use crate::summarizer::prompts::bullet_list;

const SYSTEM_PROMPT: &str = "You are the MemCortex Assistant. \
Context: {bio}. \
Rules: \
1. Use the Context above to answer. \
2. If unsure, say 'I don't have that in my memory.' \
3. Be concise (under 3 sentences). ";

/// Build the generation prompt for one turn
pub fn build_chat_prompt(bio: &str, memories: &[MemoryPrompt], message: &str) -> String {
    let texts: Vec<&str> = memories.iter().map(|m| m.text.as_str()).collect();
    format!(
        "{}\n\nContext:\n{}\n\nUser: {}",
        SYSTEM_PROMPT.replace("{bio}", bio),
        bullet_list(&texts),
        message
    )
}

/// Answer to one chat turn
#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub related_memories: Vec<MemoryPrompt>,
    /// Saving the turn and the compaction check; await or drop
    #[serde(skip)]
    pub background: TaskHandle,
}

pub struct ChatAssistant {
    manager: MemoryManager,
    client: OllamaClient,
    model: String,
    prompt_limit: usize,
}

impl ChatAssistant {
    pub fn new(
        manager: MemoryManager,
        client: OllamaClient,
        model: impl Into<String>,
        prompt_limit: usize,
    ) -> Self {
        Self {
            manager,
            client,
            model: model.into(),
            prompt_limit,
        }
    }

    /// Generate against the summarizer's Ollama host with the chat model
    pub fn from_config(manager: MemoryManager, config: &Config) -> Result<Self> {
        let client = OllamaClient::new(
            &config.summarizer.base_url,
            Duration::from_secs(config.summarizer.timeout_secs),
        )
        .map_err(|e| CortexError::Config(format!("invalid Ollama url: {e}")))?;

        info!("ChatAssistant initialized with model: {}", config.chat.model);
        Ok(Self::new(
            manager,
            client,
            config.chat.model.clone(),
            config.retrieval.prompt_limit,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `message` for `user_id`.
    ///
    /// Only generation failures are returned; missing memories or profile
    /// data degrade the prompt instead.
    pub async fn respond(&self, user_id: &str, message: &str) -> Result<ChatReply> {
        if let Err(e) = self.manager.ensure_user_exists(user_id).await {
            warn!("Could not register user {}: {}", user_id, e);
        }

        let memories = self.manager.retrieve(user_id, message).await;
        let related = format_memory_prompt(&memories, self.prompt_limit);

        let bio = match self.manager.get_user_bio(user_id).await {
            Ok(bio) => bio,
            Err(e) => {
                warn!("Could not fetch bio for {}: {}", user_id, e);
                self.manager.config().default_bio.clone()
            }
        };

        let prompt = build_chat_prompt(&bio, &related, message);
        debug!(
            "Generating reply for {} with {} memories in context",
            user_id,
            related.len()
        );

        let raw = self
            .client
            .generate(&self.model, &prompt)
            .await
            .map_err(|e| CortexError::General(format!("Failed to generate reply: {e}")))?;
        let response = strip_think_tags(&raw);

        let background = self
            .manager
            .record_interaction(user_id, message, &response)
            .await;

        Ok(ChatReply {
            response,
            related_memories: related,
            background,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingQueue, QueueConfig};
    use crate::memory::{BackgroundTasks, CompactionConfig, ManagerConfig};
    use crate::testing::{InMemoryStore, MockEmbeddingGateway, StubSummarizer};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(store: Arc<InMemoryStore>, compaction: CompactionConfig) -> MemoryManager {
        let queue = EmbeddingQueue::new(
            Arc::new(MockEmbeddingGateway::new(8)),
            QueueConfig {
                workers: 2,
                capacity: 16,
                max_attempts: 3,
                backoff_unit: Duration::from_millis(1),
                dimension: 8,
            },
        );
        MemoryManager::new(
            store.clone(),
            store,
            Arc::new(queue),
            Arc::new(StubSummarizer::new()),
            ManagerConfig {
                top_k: 10,
                compaction,
                default_bio: "Loves sailing".to_string(),
            },
            BackgroundTasks::new(8),
        )
    }

    fn assistant(server: &MockServer, manager: MemoryManager) -> ChatAssistant {
        let client = OllamaClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        ChatAssistant::new(manager, client, "test-model", 20)
    }

    #[test]
    fn test_prompt_layout() {
        let memories = vec![
            MemoryPrompt {
                text: "likes tea".to_string(),
                added: "2024-01-01T00:00:00Z".to_string(),
            },
            MemoryPrompt {
                text: "lives in Lagos".to_string(),
                added: "2024-01-02T00:00:00Z".to_string(),
            },
        ];
        let prompt = build_chat_prompt("A tester", &memories, "Where do I live?");

        assert!(prompt.starts_with("You are the MemCortex Assistant. Context: A tester. Rules: "));
        assert!(prompt.contains("3. Be concise (under 3 sentences). \n\nContext:\n- likes tea\n- lives in Lagos\n"));
        assert!(prompt.ends_with("\n\nUser: Where do I live?"));
    }

    #[tokio::test]
    async fn test_respond_uses_memories_and_records_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("I keep a red kayak"))
            .and(body_string_contains("A new user of the MemCortex system."))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "<think>recall</think>You keep a red kayak."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let manager = manager(store.clone(), CompactionConfig::new(100, 2));
        manager.save("u1", "I keep a red kayak").await.unwrap();

        let chat = assistant(&server, manager);
        let reply = chat.respond("u1", "What boat do I have?").await.unwrap();

        assert_eq!(reply.response, "You keep a red kayak.");
        assert_eq!(reply.related_memories.len(), 1);
        reply.background.wait().await.unwrap();

        let contents: Vec<String> = store
            .all_records()
            .iter()
            .map(|r| r.content().to_string())
            .collect();
        assert!(contents.contains(&"What boat do I have?".to_string()));
        assert!(contents.contains(&"AI: You keep a red kayak.".to_string()));
        assert_eq!(store.profile("u1").unwrap().username, "User_u1");
    }

    #[tokio::test]
    async fn test_generation_failure_saves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let chat = assistant(&server, manager(store.clone(), CompactionConfig::default()));

        let err = chat.respond("u1", "hello").await.unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
        assert_eq!(store.calls().save, 0);
    }

    #[tokio::test]
    async fn test_search_failure_still_answers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "Hi!"})),
            )
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        store.fail_search(true);
        let chat = assistant(&server, manager(store, CompactionConfig::new(100, 2)));

        let reply = chat.respond("u1", "hello").await.unwrap();
        assert_eq!(reply.response, "Hi!");
        assert!(reply.related_memories.is_empty());
        reply.background.wait().await.unwrap();
    }
}
