use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CortexError, Result};

/// Main configuration structure for MemCortex
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// LanceDB storage location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding gateway and worker pool
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Memory retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Summary compaction settings
    #[serde(default)]
    pub compaction: CompactionSettings,
    /// Summarization model settings
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    /// Chat assistant settings
    #[serde(default)]
    pub chat: ChatConfig,
    /// Background task queue settings
    #[serde(default)]
    pub background: BackgroundConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the LanceDB tables
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".memcortex"))
        .unwrap_or_else(|| PathBuf::from(".memcortex"))
}

/// Embedding gateway and queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Gateway provider: "ollama" or "local"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Ollama base URL
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector dimension produced by the model
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Number of embedding workers
    #[serde(default = "default_embedding_workers")]
    pub workers: usize,
    /// Maximum queued embedding jobs before producers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Gateway attempts per job
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Unit of the linear rate-limit backoff, in milliseconds
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            workers: default_embedding_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_url() -> String {
    "http://ollama:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_embedding_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

/// Upper bound for `embedding.backoff_unit_ms` (one minute)
const MAX_BACKOFF_UNIT_MS: u64 = 60_000;

fn default_embedding_timeout_secs() -> u64 {
    30
}

/// Retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Nearest neighbours returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Maximum memories rendered into a prompt
    #[serde(default = "default_prompt_limit")]
    pub prompt_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            prompt_limit: default_prompt_limit(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

fn default_prompt_limit() -> usize {
    20
}

/// Summary compaction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionSettings {
    /// Run compaction automatically after interactions
    #[serde(default = "default_compaction_enabled")]
    pub enabled: bool,
    /// Raw memory count at which compaction starts
    #[serde(default = "default_compaction_threshold")]
    pub threshold: usize,
    /// Raw memories folded into one summary
    #[serde(default = "default_compaction_batch_size")]
    pub batch_size: usize,
    /// Only compact memories older than this many days (0 = any age)
    #[serde(default)]
    pub max_age_days: u32,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: default_compaction_enabled(),
            threshold: default_compaction_threshold(),
            batch_size: default_compaction_batch_size(),
            max_age_days: 0,
        }
    }
}

fn default_compaction_enabled() -> bool {
    true
}

fn default_compaction_threshold() -> usize {
    2
}

fn default_compaction_batch_size() -> usize {
    2
}

/// Summarization model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    /// Ollama base URL
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Generation model used for summaries
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_summarizer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_generation_model(),
            timeout_secs: default_summarizer_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "deepseek-r1:1.5b".to_string()
}

fn default_summarizer_timeout_secs() -> u64 {
    300
}

/// Chat assistant configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Generation model used for replies
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Bio used when a user has none on record
    #[serde(default = "default_bio")]
    pub default_bio: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            default_bio: default_bio(),
        }
    }
}

fn default_bio() -> String {
    "A software project called MemCortex focusing on long-term AI memory.".to_string()
}

/// Background task queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    /// Maximum queued background jobs
    #[serde(default = "default_background_capacity")]
    pub capacity: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            capacity: default_background_capacity(),
        }
    }
}

fn default_background_capacity() -> usize {
    256
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CortexError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from an explicit path, or from the first default
    /// location that exists, then apply environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::read_file(path)?,
            None => {
                let default_paths = [
                    dirs::home_dir().map(|h| h.join(".memcortex").join("config.toml")),
                    dirs::config_dir().map(|c| c.join("memcortex").join("config.toml")),
                    Some(PathBuf::from("config.toml")),
                ];

                match default_paths.iter().flatten().find(|p| p.exists()) {
                    Some(path) => Self::read_file(path)?,
                    None => {
                        tracing::info!("No config file found, using defaults");
                        Self::default()
                    }
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            CortexError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "TOP_K_MEMORIES", &mut self.retrieval.top_k);
        override_parsed(&lookup, "ENABLE_AUTO_SUMMARY", &mut self.compaction.enabled);
        override_parsed(&lookup, "SUMMARY_THRESHOLD", &mut self.compaction.threshold);
        override_parsed(&lookup, "SUMMARY_BATCH_SIZE", &mut self.compaction.batch_size);
        override_parsed(&lookup, "SUMMARY_MAX_AGE_DAYS", &mut self.compaction.max_age_days);
        override_parsed(&lookup, "EMBEDDING_WORKERS", &mut self.embedding.workers);
        override_string(&lookup, "EMBEDDING_MODEL", &mut self.embedding.model);
        override_string(&lookup, "OLLAMA_HOST", &mut self.summarizer.base_url);
        override_string(&lookup, "SUMMARIZATION_MODEL", &mut self.summarizer.model);
        override_string(&lookup, "LLM_MODEL", &mut self.chat.model);
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(CortexError::Config(
                "embedding.dimension must be greater than 0".to_string(),
            ));
        }
        if self.embedding.workers == 0 {
            return Err(CortexError::Config(
                "embedding.workers must be greater than 0".to_string(),
            ));
        }
        if self.embedding.queue_capacity == 0 || self.background.capacity == 0 {
            return Err(CortexError::Config(
                "queue capacities must be greater than 0".to_string(),
            ));
        }
        if self.embedding.max_attempts == 0 {
            return Err(CortexError::Config(
                "embedding.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.embedding.backoff_unit_ms > MAX_BACKOFF_UNIT_MS {
            return Err(CortexError::Config(format!(
                "embedding.backoff_unit_ms must be at most {MAX_BACKOFF_UNIT_MS}"
            )));
        }
        if self.compaction.batch_size == 0 {
            return Err(CortexError::Config(
                "compaction.batch_size must be greater than 0".to_string(),
            ));
        }
        match self.embedding.provider.as_str() {
            "ollama" | "local" => Ok(()),
            other => Err(CortexError::Config(format!(
                "Unknown embedding provider: {other}. Use ollama or local."
            ))),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw),
        }
    }
}

fn override_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.embedding.workers, 4);
        assert_eq!(config.embedding.queue_capacity, 100);
        assert_eq!(config.embedding.max_attempts, 5);
        assert_eq!(config.embedding.backoff_unit(), Duration::from_secs(1));
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.prompt_limit, 20);
        assert!(config.compaction.enabled);
        assert_eq!(config.compaction.threshold, 2);
        assert_eq!(config.compaction.batch_size, 2);
        assert_eq!(config.compaction.max_age_days, 0);
        assert_eq!(config.summarizer.model, "deepseek-r1:1.5b");
        assert_eq!(config.summarizer.timeout_secs, 300);
        assert_eq!(config.background.capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[storage]
data_dir = "/tmp/memcortex"

[embedding]
provider = "local"
base_url = "http://localhost:11434"
model = "all-minilm"
dimension = 384
workers = 2
queue_capacity = 10
max_attempts = 3
backoff_unit_ms = 5

[retrieval]
top_k = 6

[compaction]
enabled = false
threshold = 50
batch_size = 10
max_age_days = 7

[summarizer]
model = "llama3"

[chat]
default_bio = "A test bio"
"#;

        let config = Config::from_toml(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/memcortex"));
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.embedding.base_url, "http://localhost:11434");
        assert_eq!(config.embedding.model, "all-minilm");
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.embedding.workers, 2);
        assert_eq!(config.embedding.queue_capacity, 10);
        assert_eq!(config.embedding.max_attempts, 3);
        assert_eq!(config.embedding.backoff_unit(), Duration::from_millis(5));
        assert_eq!(config.retrieval.top_k, 6);
        assert!(!config.compaction.enabled);
        assert_eq!(config.compaction.threshold, 50);
        assert_eq!(config.compaction.batch_size, 10);
        assert_eq!(config.compaction.max_age_days, 7);
        assert_eq!(config.summarizer.model, "llama3");
        assert_eq!(config.summarizer.base_url, "http://ollama:11434");
        assert_eq!(config.chat.default_bio, "A test bio");
        assert_eq!(config.chat.model, "deepseek-r1:1.5b");
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[compaction]
threshold = 5
"#;

        let config = Config::from_toml(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.compaction.threshold, 5);
        assert_eq!(config.compaction.batch_size, 2);
        assert!(config.compaction.enabled);
        assert_eq!(config.retrieval.top_k, 10);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("[compaction\nthreshold = ").unwrap_err();
        assert!(matches!(err, CortexError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TOP_K_MEMORIES", "6"),
            ("ENABLE_AUTO_SUMMARY", "false"),
            ("SUMMARY_THRESHOLD", "20"),
            ("SUMMARY_BATCH_SIZE", "5"),
            ("SUMMARY_MAX_AGE_DAYS", "3"),
            ("EMBEDDING_MODEL", "mxbai-embed-large"),
            ("OLLAMA_HOST", "http://localhost:11434"),
            ("SUMMARIZATION_MODEL", "qwen2"),
            ("LLM_MODEL", "llama3"),
        ]);

        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.retrieval.top_k, 6);
        assert!(!config.compaction.enabled);
        assert_eq!(config.compaction.threshold, 20);
        assert_eq!(config.compaction.batch_size, 5);
        assert_eq!(config.compaction.max_age_days, 3);
        assert_eq!(config.embedding.model, "mxbai-embed-large");
        assert_eq!(config.summarizer.base_url, "http://localhost:11434");
        assert_eq!(config.summarizer.model, "qwen2");
        assert_eq!(config.chat.model, "llama3");
    }

    #[test]
    fn test_invalid_env_override_keeps_default() {
        let mut config = Config::default();
        config.apply_overrides_from(|key| match key {
            "TOP_K_MEMORIES" => Some("lots".to_string()),
            "EMBEDDING_MODEL" => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.embedding.model, "nomic-embed-text");
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.embedding.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_backoff_unit() {
        let mut config = Config::default();
        config.embedding.backoff_unit_ms = MAX_BACKOFF_UNIT_MS;
        assert!(config.validate().is_ok());

        config.embedding.backoff_unit_ms = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_unit_ms"));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.retrieval.top_k == 3 || std::env::var("TOP_K_MEMORIES").is_ok());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/memcortex.toml")));
        assert!(matches!(result, Err(CortexError::Config(_))));
    }
}
