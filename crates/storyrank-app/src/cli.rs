//! CLI argument definitions for the Storyrank binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use storyrank_core::config::StoryrankConfig;

/// Storyrank - ingests Hacker News stories and serves semantic search over them.
#[derive(Parser, Debug)]
#[command(name = "storyrank", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// SQLite database file.
    #[arg(short = 'd', long = "db-path")]
    pub db_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Base URL of the embedding provider.
    #[arg(long = "embedding-url")]
    pub embedding_url: Option<String>,

    /// Which loops to run.
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = RunMode::All)]
    pub mode: RunMode,

    /// Keep stored items instead of clearing the database at startup.
    #[arg(long = "keep-data")]
    pub keep_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Ingestion worker and API server.
    All,
    /// Ingestion worker only.
    Worker,
    /// API server only.
    Api,
}

impl RunMode {
    pub fn runs_worker(self) -> bool {
        matches!(self, RunMode::All | RunMode::Worker)
    }

    pub fn runs_api(self) -> bool {
        matches!(self, RunMode::All | RunMode::Api)
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > STORYRANK_CONFIG env var > ~/.storyrank/config.toml.
    pub fn resolve_config_path(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env("STORYRANK_CONFIG") {
            return PathBuf::from(p);
        }
        match env("HOME") {
            Some(home) => PathBuf::from(home).join(".storyrank").join("config.toml"),
            None => PathBuf::from("storyrank.toml"),
        }
    }

    /// Layer environment variables, then CLI flags, over a loaded config.
    pub fn apply_overrides(&self, config: &mut StoryrankConfig, env: impl Fn(&str) -> Option<String>) {
        if let Some(port) = env("STORYRANK_PORT").and_then(|p| p.parse::<u16>().ok()) {
            config.api.port = port;
        }
        if let Some(path) = env("STORYRANK_DB_PATH") {
            config.storage.db_path = PathBuf::from(path);
        }
        if let Some(url) = env("STORYRANK_EMBEDDING_URL") {
            config.embedding.base_url = url;
        }
        if config.embedding.api_key.is_none() {
            config.embedding.api_key = env("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        }

        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(ref path) = self.db_path {
            config.storage.db_path = path.clone();
        }
        if let Some(ref url) = self.embedding_url {
            config.embedding.base_url = url.clone();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
        if self.keep_data {
            config.storage.reset_on_start = false;
        }
    }
}
