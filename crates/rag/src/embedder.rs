//! Embedding provider
//!
//! Generates dense embeddings with an ordered list of backend models.
//! On failure of the selected model the provider retries once against
//! the next candidate; successful embeddings are cached by
//! `(sha256(text), model_id)` and identical concurrent requests share a
//! single in-flight computation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use studymate_config::constants::ABBREVIATIONS;

use crate::cache::{CacheStats, SingleFlight, TtlCache};
use crate::{sha256_hex, RagError};

/// Backend that turns text into a fixed-length vector
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Stable model identifier, part of the cache key
    fn id(&self) -> &str;

    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Languages this model is specialized for; empty means general-purpose
    fn languages(&self) -> &[String] {
        &[]
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

/// Ollama embedding backend configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
    /// Languages this model is specialized for
    pub languages: Vec<String>,
    /// L2-normalize returned vectors
    pub normalize: bool,
}

impl Default for OllamaEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: studymate_config::constants::endpoints::OLLAMA_DEFAULT.to_string(),
            model: studymate_config::constants::models::EMBEDDING_PRIMARY.to_string(),
            dimension: studymate_config::constants::models::EMBEDDING_DIM,
            timeout: Duration::from_millis(
                studymate_config::constants::timeouts::EMBED_REQUEST_MS,
            ),
            languages: Vec::new(),
            normalize: true,
        }
    }
}

impl OllamaEmbedderConfig {
    /// Configuration for one of the models named in the settings
    pub fn for_model(
        settings: &studymate_config::EmbeddingSettings,
        model: &str,
        languages: Vec<String>,
    ) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: model.to_string(),
            dimension: settings.dimension,
            timeout: Duration::from_millis(settings.timeout_ms),
            languages,
            normalize: true,
        }
    }
}

/// Embedding backend served by Ollama's `/api/embeddings`
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: OllamaEmbedderConfig,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaEmbedderConfig) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn id(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn languages(&self) -> &[String] {
        &self.config.languages
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let request = EmbeddingsRequest {
            model: &self.config.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.config.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "{} returned {}: {}",
                self.config.model, status, body
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let mut embedding = parsed.embedding;
        if embedding.len() != self.config.dimension {
            return Err(RagError::Embedding(format!(
                "{} returned dimension {} (expected {})",
                self.config.model,
                embedding.len(),
                self.config.dimension
            )));
        }

        if self.config.normalize {
            normalize(&mut embedding);
        }

        Ok(embedding)
    }
}

fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in embedding.iter_mut() {
            *v /= norm;
        }
    }
}

/// Deterministic hash-based embedder (no model required)
///
/// Close texts do not get close vectors; only useful where determinism
/// matters more than semantics, such as tests and offline tooling.
pub struct SimpleEmbedder {
    id: String,
    dimension: usize,
    calls: AtomicUsize,
}

impl SimpleEmbedder {
    pub fn new(id: impl Into<String>, dimension: usize) -> Self {
        Self {
            id: id.into(),
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of embed invocations that reached this backend
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % self.dimension;
            embedding[idx] += 1.0;
        }
        normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl EmbeddingBackend for SimpleEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.embed_sync(text))
    }
}

/// Expands technical abbreviations before embedding (BST, DFS, ...)
/// so terse questions land near the textbook's long-form vocabulary
pub struct TermExpander {
    rules: Vec<(Regex, String)>,
}

impl TermExpander {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let rules = pairs
            .iter()
            .filter_map(|(abbr, full)| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(abbr)))
                    .ok()
                    .map(|re| (re, full.to_string()))
            })
            .collect();
        Self { rules }
    }

    pub fn expand(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, full) in &self.rules {
            out = re.replace_all(&out, full.as_str()).into_owned();
        }
        out
    }
}

impl Default for TermExpander {
    fn default() -> Self {
        Self::new(ABBREVIATIONS)
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone)]
pub struct EmbeddingProviderConfig {
    pub cache_size: usize,
    pub cache_ttl: Duration,
    pub expand_abbreviations: bool,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        use studymate_config::constants::cache;
        Self {
            cache_size: cache::EMBEDDING_MAX_ENTRIES,
            cache_ttl: Duration::from_secs(cache::EMBEDDING_TTL_SECS),
            expand_abbreviations: true,
        }
    }
}

impl From<&studymate_config::EmbeddingSettings> for EmbeddingProviderConfig {
    fn from(settings: &studymate_config::EmbeddingSettings) -> Self {
        Self {
            cache_size: settings.cache_size,
            cache_ttl: Duration::from_secs(settings.cache_ttl_secs),
            expand_abbreviations: settings.expand_abbreviations,
        }
    }
}

/// Ordered-fallback embedding provider with caching and single-flight
pub struct EmbeddingProvider {
    backends: Vec<Arc<dyn EmbeddingBackend>>,
    cache: TtlCache<Vec<f32>>,
    flight: SingleFlight<Vec<f32>>,
    expander: Option<TermExpander>,
}

impl EmbeddingProvider {
    /// `backends` are tried in order; a language hint promotes matching
    /// specialized models to the front
    pub fn new(backends: Vec<Arc<dyn EmbeddingBackend>>, config: EmbeddingProviderConfig) -> Self {
        let expander = config.expand_abbreviations.then(TermExpander::default);
        Self {
            backends,
            cache: TtlCache::new(config.cache_size, config.cache_ttl),
            flight: SingleFlight::new(),
            expander,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn candidate_order(&self, language_hint: Option<&str>) -> Vec<Arc<dyn EmbeddingBackend>> {
        let mut ordered: Vec<Arc<dyn EmbeddingBackend>> = Vec::with_capacity(self.backends.len());
        if let Some(hint) = language_hint {
            for backend in &self.backends {
                if backend.languages().iter().any(|l| l == hint) {
                    ordered.push(Arc::clone(backend));
                }
            }
        }
        for backend in &self.backends {
            if !ordered.iter().any(|b| b.id() == backend.id()) {
                ordered.push(Arc::clone(backend));
            }
        }
        ordered
    }

    /// Embed `text`, retrying once against the next candidate model.
    /// Fails with `EmbeddingUnavailable` when both attempts fail.
    pub async fn embed(
        &self,
        text: &str,
        language_hint: Option<&str>,
    ) -> Result<Vec<f32>, RagError> {
        let processed = match &self.expander {
            Some(expander) => expander.expand(text),
            None => text.to_string(),
        };
        let content_hash = sha256_hex(processed.as_bytes());

        let mut reasons = Vec::new();
        // Primary plus one fallback
        for backend in self.candidate_order(language_hint).into_iter().take(2) {
            let key = format!("{}:{}", content_hash, backend.id());

            if let Some(cached) = self.cache.get(&key) {
                tracing::debug!(model = backend.id(), "embedding cache hit");
                return Ok(cached);
            }

            let backend_for_flight = Arc::clone(&backend);
            let text_for_flight = processed.clone();
            let result = self
                .flight
                .run(&key, || async move {
                    backend_for_flight.embed(&text_for_flight).await
                })
                .await;

            match result {
                Ok(embedding) => {
                    self.cache.insert(key, embedding.clone());
                    return Ok(embedding);
                }
                Err(e) => {
                    tracing::warn!(model = backend.id(), error = %e, "embedding model failed");
                    reasons.push(format!("{}: {}", backend.id(), e));
                }
            }
        }

        Err(RagError::EmbeddingUnavailable(reasons.join("; ")))
    }
}
