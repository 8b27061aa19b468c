use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use prism_index::{ChunkerConfig, FileFilter, IndexerConfig};
use prism_llm::RetryPolicy;
use prism_review::ReviewConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub index: IndexConfig,
    pub review: ReviewSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub max_tokens: u32,
    /// Read from `PRISM_LLM_API_KEY` or `OPENAI_API_KEY`; never written back.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            max_tokens: 4096,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub max_file_bytes: u64,
    pub embed_batch_size: usize,
    pub embed_timeout_secs: u64,
    pub store: StoreBackend,
    /// JSON snapshot of the in-memory store, loaded at start and saved after ingestion.
    pub snapshot_path: PathBuf,
    pub qdrant_url: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_max_chars: 4000,
            chunk_overlap_chars: 400,
            max_file_bytes: 100 * 1024,
            embed_batch_size: 32,
            embed_timeout_secs: 60,
            store: StoreBackend::Memory,
            snapshot_path: PathBuf::from(".prism/index.json"),
            qdrant_url: "http://localhost:6334".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewSettings {
    pub max_iterations: u32,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub llm_timeout_secs: u64,
    pub tool_timeout_secs: u64,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_retries: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            llm_timeout_secs: 120,
            tool_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PRISM_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("PRISM_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("PRISM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("PRISM_LLM_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("PRISM_QDRANT_URL") {
            self.index.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("PRISM_MAX_ITERATIONS") {
            match v.parse::<u32>() {
                Ok(n) => self.review.max_iterations = n,
                Err(_) => tracing::warn!("ignoring invalid PRISM_MAX_ITERATIONS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("PRISM_MAX_RETRIES") {
            match v.parse::<u32>() {
                Ok(n) => self.review.max_retries = n,
                Err(_) => tracing::warn!("ignoring invalid PRISM_MAX_RETRIES value: {v}"),
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error describing the first out-of-range setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.chunker()
            .validate()
            .context("invalid [index] chunk settings")?;
        if self.index.max_file_bytes == 0 {
            bail!("index.max_file_bytes must be > 0");
        }
        if self.index.embed_batch_size == 0 {
            bail!("index.embed_batch_size must be > 0");
        }
        if self.review.max_iterations == 0 {
            bail!("review.max_iterations must be > 0");
        }
        if self.review.max_backoff_ms < self.review.base_backoff_ms {
            bail!("review.max_backoff_ms must not be below review.base_backoff_ms");
        }
        for (name, secs) in [
            ("index.embed_timeout_secs", self.index.embed_timeout_secs),
            ("review.llm_timeout_secs", self.review.llm_timeout_secs),
            ("review.tool_timeout_secs", self.review.tool_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be > 0");
            }
        }
        if self.llm.base_url.trim().is_empty() {
            bail!("llm.base_url must not be empty");
        }
        Ok(())
    }

    #[must_use]
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chars: self.index.chunk_max_chars,
            overlap_chars: self.index.chunk_overlap_chars,
        }
    }

    fn retry(&self, call_timeout_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.review.max_retries,
            base_backoff: Duration::from_millis(self.review.base_backoff_ms),
            max_backoff: Duration::from_millis(self.review.max_backoff_ms),
            call_timeout: Duration::from_secs(call_timeout_secs),
        }
    }

    /// Retry policy for embedding calls during ingestion and search.
    #[must_use]
    pub fn embed_retry(&self) -> RetryPolicy {
        self.retry(self.index.embed_timeout_secs)
    }

    #[must_use]
    pub fn indexer(&self) -> IndexerConfig {
        IndexerConfig {
            chunker: self.chunker(),
            filter: FileFilter {
                max_file_bytes: self.index.max_file_bytes,
            },
            retry: self.embed_retry(),
            embed_batch_size: self.index.embed_batch_size,
        }
    }

    #[must_use]
    pub fn review_config(&self) -> ReviewConfig {
        ReviewConfig {
            max_iterations: self.review.max_iterations,
            retry: self.retry(self.review.llm_timeout_secs),
        }
    }

    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.review.tool_timeout_secs)
    }
}
