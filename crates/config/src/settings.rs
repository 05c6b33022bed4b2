//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{cache, endpoints, engine, generation, models, retrieval, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Retrieval and merge configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Language model chain configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// Orchestrator configuration
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Ollama endpoint serving the embedding models
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    /// Primary embedding model
    #[serde(default = "default_embedding_primary")]
    pub primary_model: String,

    /// Fallback embedding model, tried once when the primary fails
    #[serde(default = "default_embedding_fallback")]
    pub fallback_model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,

    /// Per-request timeout (ms)
    #[serde(default = "default_embed_timeout_ms")]
    pub timeout_ms: u64,

    /// Embedding cache bounds
    #[serde(default = "default_embedding_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_embedding_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Expand technical abbreviations before embedding
    #[serde(default = "default_true")]
    pub expand_abbreviations: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            primary_model: default_embedding_primary(),
            fallback_model: default_embedding_fallback(),
            dimension: default_embedding_dim(),
            timeout_ms: default_embed_timeout_ms(),
            cache_size: default_embedding_cache_size(),
            cache_ttl_secs: default_embedding_cache_ttl_secs(),
            expand_abbreviations: true,
        }
    }
}

/// Retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Qdrant endpoint
    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,

    /// Collection names, one per corpus
    #[serde(default = "default_course_collection")]
    pub course_collection: String,
    #[serde(default = "default_textbook_collection")]
    pub textbook_collection: String,

    /// Number of chunks requested from each corpus and returned overall
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Keywords classifying a question as course-specific
    #[serde(default = "default_course_keywords")]
    pub course_keywords: Vec<String>,

    /// Per-corpus query-result cache bounds
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
    #[serde(default = "default_query_cache_ttl_secs")]
    pub query_cache_ttl_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            qdrant_endpoint: default_qdrant_endpoint(),
            course_collection: default_course_collection(),
            textbook_collection: default_textbook_collection(),
            top_k: default_top_k(),
            course_keywords: default_course_keywords(),
            query_cache_size: default_query_cache_size(),
            query_cache_ttl_secs: default_query_cache_ttl_secs(),
        }
    }
}

/// One language model in the fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model name as known to the backend
    pub name: String,

    /// Lower priority is tried first
    pub priority: u8,

    /// Per-attempt timeout (ms)
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive failures before the model is marked unavailable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cool-down before an unavailable model is probed again (secs)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Ollama endpoint
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    /// Candidate models; tried in ascending priority order
    #[serde(default = "default_models")]
    pub models: Vec<ModelSettings>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            models: default_models(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Bounded worker pool for model generation
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_generations: usize,

    /// Maximum queue wait before a request is rejected (ms)
    #[serde(default = "default_queue_wait_ms")]
    pub max_queue_wait_ms: u64,

    /// Response cache bounds
    #[serde(default = "default_response_cache_size")]
    pub response_cache_size: usize,
    #[serde(default = "default_response_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,

    /// Prompt context budget in estimated tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Response returned when neither corpus has relevant chunks
    #[serde(default = "default_no_information_message")]
    pub no_information_message: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_generations: default_max_concurrent(),
            max_queue_wait_ms: default_queue_wait_ms(),
            response_cache_size: default_response_cache_size(),
            response_cache_ttl_secs: default_response_cache_ttl_secs(),
            max_context_tokens: default_max_context_tokens(),
            no_information_message: default_no_information_message(),
        }
    }
}

fn default_ollama_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}
fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_embedding_primary() -> String {
    models::EMBEDDING_PRIMARY.to_string()
}
fn default_embedding_fallback() -> String {
    models::EMBEDDING_FALLBACK.to_string()
}
fn default_embedding_dim() -> usize {
    models::EMBEDDING_DIM
}
fn default_embed_timeout_ms() -> u64 {
    timeouts::EMBED_REQUEST_MS
}
fn default_embedding_cache_size() -> usize {
    cache::EMBEDDING_MAX_ENTRIES
}
fn default_embedding_cache_ttl_secs() -> u64 {
    cache::EMBEDDING_TTL_SECS
}
fn default_course_collection() -> String {
    "course_materials".to_string()
}
fn default_textbook_collection() -> String {
    "textbook".to_string()
}
fn default_top_k() -> usize {
    retrieval::DEFAULT_TOP_K
}
fn default_course_keywords() -> Vec<String> {
    retrieval::COURSE_KEYWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_query_cache_size() -> usize {
    cache::QUERY_MAX_ENTRIES
}
fn default_query_cache_ttl_secs() -> u64 {
    cache::QUERY_TTL_SECS
}
fn default_llm_timeout_ms() -> u64 {
    timeouts::LLM_REQUEST_MS
}
fn default_failure_threshold() -> u32 {
    generation::FAILURE_THRESHOLD
}
fn default_cooldown_secs() -> u64 {
    generation::COOLDOWN_SECS
}
fn default_models() -> Vec<ModelSettings> {
    let mut list = vec![ModelSettings {
        name: models::PREFERRED_LLM.to_string(),
        priority: 0,
        timeout_ms: default_llm_timeout_ms(),
        failure_threshold: default_failure_threshold(),
        cooldown_secs: default_cooldown_secs(),
    }];
    for (i, name) in models::FALLBACK_LLMS.iter().enumerate() {
        list.push(ModelSettings {
            name: name.to_string(),
            priority: (i + 1) as u8,
            timeout_ms: default_llm_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        });
    }
    list
}
fn default_max_tokens() -> usize {
    generation::MAX_TOKENS
}
fn default_temperature() -> f32 {
    generation::TEMPERATURE
}
fn default_top_p() -> f32 {
    generation::TOP_P
}
fn default_max_concurrent() -> usize {
    engine::MAX_CONCURRENT_GENERATIONS
}
fn default_queue_wait_ms() -> u64 {
    timeouts::QUEUE_WAIT_MS
}
fn default_response_cache_size() -> usize {
    cache::RESPONSE_MAX_ENTRIES
}
fn default_response_cache_ttl_secs() -> u64 {
    cache::RESPONSE_TTL_SECS
}
fn default_max_context_tokens() -> usize {
    engine::MAX_CONTEXT_TOKENS
}
fn default_no_information_message() -> String {
    engine::NO_INFORMATION_MESSAGE.to_string()
}
fn default_true() -> bool {
    true
}

impl Settings {
    /// Validate settings, rejecting values that would misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be >= 1".into()));
        }
        if self.llm.models.is_empty() {
            return Err(ConfigError::Invalid(
                "llm.models must contain at least one model".into(),
            ));
        }
        if self.engine.max_concurrent_generations == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent_generations must be >= 1".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimension must be >= 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(
                "llm.temperature must be within [0, 2]".into(),
            ));
        }
        Ok(())
    }
}

/// Load settings from an optional TOML file plus STUDYMATE_ environment
/// overrides (e.g. STUDYMATE_RETRIEVAL__TOP_K=3)
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(
        Environment::with_prefix("STUDYMATE")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    settings.validate()?;
    tracing::debug!(environment = ?settings.environment, "settings loaded");
    Ok(settings)
}
