use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StoryrankError};
use crate::types::ItemKind;

/// Top-level configuration for Storyrank.
///
/// Built once at startup (file, then CLI and environment overrides) and
/// handed to each component by reference. Components never read the
/// environment themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryrankConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl StoryrankConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoryrankConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Reject combinations that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.feed.base_url.trim().is_empty() {
            return Err(StoryrankError::Config("feed.base_url must not be empty".into()));
        }
        if self.search.default_limit == 0 {
            return Err(StoryrankError::Config(
                "search.default_limit must be at least 1".into(),
            ));
        }
        if self.search.max_limit < self.search.default_limit {
            return Err(StoryrankError::Config(format!(
                "search.max_limit ({}) is below search.default_limit ({})",
                self.search.max_limit, self.search.default_limit
            )));
        }
        if self.ingest.quota_cooldown_secs < self.ingest.transient_cooldown_secs {
            return Err(StoryrankError::Config(
                "ingest.quota_cooldown_secs must not be shorter than ingest.transient_cooldown_secs"
                    .into(),
            ));
        }
        if self.ingest.accepted_kinds.is_empty() {
            return Err(StoryrankError::Config(
                "ingest.accepted_kinds must list at least one kind".into(),
            ));
        }
        if self.embedding.provider == EmbeddingProviderKind::OpenAi
            && self.embedding.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(StoryrankError::Config(
                "embedding.api_key is required for the openai provider".into(),
            ));
        }
        if self.embedding.provider == EmbeddingProviderKind::Onnx && self.embedding.model_dir.is_none() {
            return Err(StoryrankError::Config(
                "embedding.model_dir is required for the onnx provider".into(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` wins if set.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Which of the feed's ranked lists to poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedList {
    #[default]
    Top,
    New,
    Best,
}

impl FeedList {
    /// Path of the list resource relative to the feed base URL.
    pub fn resource(&self) -> &'static str {
        match self {
            FeedList::Top => "topstories.json",
            FeedList::New => "newstories.json",
            FeedList::Best => "beststories.json",
        }
    }
}

/// Remote item feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub list: FeedList,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Cap on candidates processed per cycle. 0 means no cap.
    pub max_items_per_cycle: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            list: FeedList::Top,
            timeout_secs: 10,
            max_items_per_cycle: 0,
        }
    }
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Companion HTTP service exposing `POST /embed`.
    #[default]
    Local,
    /// OpenAI-compatible `POST /embeddings`.
    #[serde(rename = "openai")]
    OpenAi,
    /// In-process ONNX sentence-transformer (requires the `onnx` feature).
    Onnx,
    /// Deterministic hash vectors. Offline development only.
    Mock,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    /// Model name sent to OpenAI-compatible providers.
    pub model: String,
    /// Bearer token for OpenAI-compatible providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Requested output dimensionality, where the provider supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Local,
            base_url: "http://localhost:6000".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimensions: None,
            model_dir: None,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Ingestion loop pacing and backoff.
///
/// The quota cooldown is the long tier (provider rate limits clear on the
/// order of minutes), the transient cooldown the short one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    /// Pause between the end of one cycle and the start of the next.
    pub cycle_interval_secs: u64,
    /// Pause after the candidate list could not be fetched.
    pub discovery_cooldown_secs: u64,
    pub quota_cooldown_secs: u64,
    pub transient_cooldown_secs: u64,
    /// Delay between successive embedding requests.
    pub pace_ms: u64,
    /// Item kinds treated as primary content.
    pub accepted_kinds: Vec<ItemKind>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cycle_interval_secs: 300,
            discovery_cooldown_secs: 300,
            quota_cooldown_secs: 300,
            transient_cooldown_secs: 60,
            pace_ms: 100,
            accepted_kinds: vec![ItemKind::Story],
        }
    }
}

impl IngestConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn discovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.discovery_cooldown_secs)
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.quota_cooldown_secs)
    }

    pub fn transient_cooldown(&self) -> Duration {
        Duration::from_secs(self.transient_cooldown_secs)
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

/// Query-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result count when the caller does not ask for one.
    pub default_limit: usize,
    /// Larger requested counts are clamped to this.
    pub max_limit: usize,
    /// Deadline covering query embedding plus the store scan.
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            request_timeout_secs: 10,
        }
    }
}

impl SearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Drop all stored items when the store is opened. Destructive: every
    /// restart starts from an empty index while this is set.
    pub reset_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/stories.db"),
            reset_on_start: true,
        }
    }
}

/// HTTP query surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Requests per second accepted on `/search`. 0 disables the limiter.
    pub rate_limit_per_sec: u64,
    /// How long in-flight requests get to finish after shutdown is requested.
    pub shutdown_grace_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            rate_limit_per_sec: 100,
            shutdown_grace_secs: 5,
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
