//! Configuration for the report grader.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{GraderError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// LLM (judge) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.openai.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model name used as judge (e.g., "gpt-4o-mini")
    pub model: String,

    /// Maximum tokens for response (optional)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation (optional)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Embedding provider configuration.
///
/// Empty `api_base`/`api_key` fall back to the LLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Vector length; also the length of zero-vector fallbacks.
    pub dimension: usize,
    /// Number of chunks sent per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 100,
        }
    }
}

/// Chunking and similarity search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Words per chunk.
    pub chunk_size: usize,
    /// Words shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks retrieved per claim.
    pub top_k: usize,
    /// Chunks at or below this cosine similarity are never returned.
    pub min_similarity: f32,
    /// Characters of each chunk shown to the judge.
    pub evidence_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 3,
            min_similarity: 0.3,
            evidence_chars: 500,
        }
    }
}

impl RetrievalConfig {
    /// Words the window advances by.
    pub fn stride(&self) -> Result<usize> {
        if self.chunk_size == 0 {
            return Err(GraderError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(GraderError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(self.chunk_size - self.chunk_overlap)
    }
}

/// Retry budgets and metric switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Judge attempts per claim, question or rubric call.
    pub max_retries: usize,
    /// Rubric criteria that must parse before a reply is accepted.
    pub min_valid_criteria: usize,
    /// Skip gold questions without supporting files or URLs.
    pub ignore_not_answerable: bool,
    /// Reports longer than this many characters are truncated.
    pub max_report_chars: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_valid_criteria: 5,
            ignore_not_answerable: false,
            max_report_chars: 60_000,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM settings
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grading: GradingConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    embedding: Option<EmbeddingConfig>,
    retrieval: Option<RetrievalConfig>,
    grading: Option<GradingConfig>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, EMBEDDING_*)
    /// 2. Config file (~/.config/report-grader/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn load_with(path: &Path) -> Result<Self> {
        Self::load_with_lookup(path, |key| env::var(key).ok())
    }

    fn load_with_lookup(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::load_from_file(&path.to_path_buf())?;
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Overwrite settings from `lookup`, which maps variable names to values.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_base) = lookup("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Some(api_key) = lookup("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(max_tokens) = lookup("LLM_MAX_TOKENS") {
            if let Ok(tokens) = max_tokens.parse() {
                self.llm.max_tokens = tokens;
            }
        }

        if let Some(temperature) = lookup("LLM_TEMPERATURE") {
            if let Ok(temp) = temperature.parse() {
                self.llm.temperature = temp;
            }
        }

        if let Some(api_base) = lookup("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }

        if let Some(api_key) = lookup("EMBEDDING_API_KEY") {
            self.embedding.api_key = api_key;
        }

        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        if let Some(dimension) = lookup("EMBEDDING_DIMENSION") {
            if let Ok(dim) = dimension.parse() {
                self.embedding.dimension = dim;
            }
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GraderError::io(path, e))?;
        Self::from_yaml(&content)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| GraderError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
        }

        if let Some(embedding) = file_config.embedding {
            config.embedding = embedding;
        }
        if let Some(retrieval) = file_config.retrieval {
            config.retrieval = retrieval;
        }
        if let Some(grading) = file_config.grading {
            config.grading = grading;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "report-grader")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(GraderError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(GraderError::Config(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(GraderError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(GraderError::Configuration(
                "embedding dimension and batch_size must be greater than zero".to_string(),
            ));
        }

        self.retrieval.stride()?;
        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Embedding endpoint, falling back to the LLM endpoint.
    pub fn embedding_api_base(&self) -> &str {
        if self.embedding.api_base.is_empty() {
            &self.llm.api_base
        } else {
            &self.embedding.api_base
        }
    }

    /// Embedding key, falling back to the LLM key.
    pub fn embedding_api_key(&self) -> &str {
        if self.embedding.api_key.is_empty() {
            &self.llm.api_key
        } else {
            &self.embedding.api_key
        }
    }
}
