//! TOML configuration parsing and validation.
//!
//! Every tunable of the answering pipeline lives here: retrieval sizes,
//! collaborator endpoints, and the faithfulness thresholds. Collaborators
//! are constructed from these sections once, at the process entry point,
//! and handed to the pipeline explicitly.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            min_tokens: default_min_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_min_tokens() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
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
pub struct RetrievalConfig {
    /// Number of context chunks handed to generation.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Over-fetch factor applied to `top_k` when reranking is off.
    #[serde(default = "default_fetch_multiplier")]
    pub fetch_multiplier: usize,
    /// Over-fetch factor applied to `top_k` when reranking is on.
    #[serde(default = "default_rerank_fetch_multiplier")]
    pub rerank_fetch_multiplier: usize,
    /// Prior user turns folded into the retrieval query.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Prior messages loaded from the session for reformulation and the
    /// transcript block.
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fetch_multiplier: default_fetch_multiplier(),
            rerank_fetch_multiplier: default_rerank_fetch_multiplier(),
            history_turns: default_history_turns(),
            history_messages: default_history_messages(),
        }
    }
}

fn default_top_k() -> usize {
    12
}
fn default_fetch_multiplier() -> usize {
    2
}
fn default_rerank_fetch_multiplier() -> usize {
    3
}
fn default_history_turns() -> usize {
    3
}
fn default_history_messages() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            model: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generation_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Faithfulness at or above this passes outright.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Scores in `[pass_threshold * warning_ratio, pass_threshold)` are kept
    /// with a warning status.
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,
    /// Minimum cosine similarity for a sentence to count as supported.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_min_sentence_chars")]
    pub min_sentence_chars: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pass_threshold: default_pass_threshold(),
            warning_ratio: default_warning_ratio(),
            similarity_threshold: default_similarity_threshold(),
            min_sentence_chars: default_min_sentence_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_pass_threshold() -> f64 {
    0.75
}
fn default_warning_ratio() -> f64 {
    0.7
}
fn default_similarity_threshold() -> f32 {
    0.5
}
fn default_min_sentence_chars() -> usize {
    10
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
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// A config with every section at its default and a local SQLite path.
    ///
    /// Used by tests and by commands that run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/prep.sqlite"),
            },
            index: IndexConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            reranker: RerankerConfig::default(),
            generation: GenerationConfig {
                provider: default_generation_provider(),
                url: None,
                model: "gpt-4o-mini".to_string(),
                api_key_env: default_api_key_env(),
                temperature: default_temperature(),
                max_tokens: default_generation_max_tokens(),
                timeout_secs: default_generation_timeout(),
            },
            verification: VerificationConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.fetch_multiplier < 1 || config.retrieval.rerank_fetch_multiplier < 1 {
        bail!("retrieval fetch multipliers must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Reranker
    if config.reranker.enabled {
        if config.reranker.url.is_none() {
            bail!("reranker.url must be specified when reranker.enabled = true");
        }
        if config.reranker.model.is_none() {
            bail!("reranker.model must be specified when reranker.enabled = true");
        }
    }

    // Generation
    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.generation.model.trim().is_empty() {
        bail!("generation.model must not be empty");
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be >= 1");
    }

    // Verification
    let v = &config.verification;
    if !(v.pass_threshold > 0.0 && v.pass_threshold <= 1.0) {
        bail!("verification.pass_threshold must be in (0.0, 1.0]");
    }
    if !(v.warning_ratio > 0.0 && v.warning_ratio <= 1.0) {
        bail!("verification.warning_ratio must be in (0.0, 1.0]");
    }
    if !(-1.0..=1.0).contains(&v.similarity_threshold) {
        bail!("verification.similarity_threshold must be in [-1.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "./data/prep.sqlite"

[generation]
model = "gpt-4o-mini"
"#;

    #[test]
    fn test_defaults_applied() {
        let config: Config = toml::from_str(BASE).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.top_k, 12);
        assert_eq!(config.retrieval.history_turns, 3);
        assert_eq!(config.verification.pass_threshold, 0.75);
        assert_eq!(config.verification.warning_ratio, 0.7);
        assert_eq!(config.verification.similarity_threshold, 0.5);
        assert!(config.verification.enabled);
        assert!(!config.reranker.enabled);
        assert_eq!(config.generation.timeout_secs, 60);
    }

    #[test]
    fn test_reranker_requires_url() {
        let text = format!("{}\n[reranker]\nenabled = true\nmodel = \"bge\"\n", BASE);
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("reranker.url"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let text = format!("{}\n[verification]\npass_threshold = 1.5\n", BASE);
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_openai_embedding_needs_dims() {
        let text = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            BASE
        );
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_minimal_is_valid() {
        validate(&Config::minimal()).unwrap();
    }
}
