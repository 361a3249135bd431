//! TOML configuration parsing and validation.
//!
//! See `config/promptrag.example.toml` for a complete file. Only
//! `[embedding]` is required; every other section has defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("./data/prompts-export.json")
}

/// Disk-backed index settings. Without `dir` the pipeline runs on the
/// in-memory index only.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// OpenAI-compatible API base.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            api_base: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: default_chat_model(),
            api_base: None,
            temperature: default_temperature(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    #[serde(default = "default_ask_top_k")]
    pub ask_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: default_search_top_k(),
            ask_top_k: default_ask_top_k(),
            max_top_k: default_max_top_k(),
            max_context_chars: default_max_context_chars(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_search_top_k() -> usize {
    10
}
fn default_ask_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    50
}
fn default_max_context_chars() -> usize {
    8_000
}
fn default_snippet_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4200".to_string()
}

/// Read, parse and validate a configuration file.
///
/// `OPENAI_CHAT_MODEL`, when set, overrides `generation.model`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(model) = std::env::var("OPENAI_CHAT_MODEL") {
        if !model.trim().is_empty() {
            config.generation.model = model;
        }
    }

    Ok(config)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Retrieval
    let r = &config.retrieval;
    if r.max_top_k == 0 {
        anyhow::bail!("retrieval.max_top_k must be >= 1");
    }
    if r.search_top_k == 0 || r.search_top_k > r.max_top_k {
        anyhow::bail!("retrieval.search_top_k must be in [1, {}]", r.max_top_k);
    }
    if r.ask_top_k == 0 || r.ask_top_k > r.max_top_k {
        anyhow::bail!("retrieval.ask_top_k must be in [1, {}]", r.max_top_k);
    }
    if r.max_context_chars == 0 {
        anyhow::bail!("retrieval.max_context_chars must be > 0");
    }

    Ok(())
}
