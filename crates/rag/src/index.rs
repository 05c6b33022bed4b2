//! Per-corpus vector indexes
//!
//! Each corpus (course materials, textbook) is searched independently.
//! `QdrantIndex` backs a corpus with a qdrant collection; `MemoryIndex`
//! is an exact-scan index for tests and small corpora. `CorpusIndex`
//! wraps either with a short-lived query-result cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        value::Kind, Condition, CreateCollectionBuilder, Distance, FieldCondition, Filter, Match,
        PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};
use tokio::sync::RwLock;

use studymate_core::{Chunk, ChunkMetadata, Corpus, ScoredChunk};

use crate::cache::{CacheStats, TtlCache};
use crate::{sha256_hex, RagError};

/// Metadata filter applied at search time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Module or chapter label
    pub section: Option<String>,
    /// Language tag
    pub language: Option<String>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.section.is_none() && self.language.is_none()
    }

    /// Exact-match evaluation, used by the in-memory index
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(ref section) = self.section {
            if metadata.section.as_deref() != Some(section.as_str()) {
                return false;
            }
        }
        if let Some(ref language) = self.language {
            if metadata.language.as_deref() != Some(language.as_str()) {
                return false;
            }
        }
        true
    }

    /// Stable string form, part of query-result cache keys
    pub fn fingerprint(&self) -> String {
        format!(
            "s={};l={}",
            self.section.as_deref().unwrap_or(""),
            self.language.as_deref().unwrap_or("")
        )
    }

    fn into_qdrant(self) -> Filter {
        let mut conditions = Vec::new();

        for (key, value) in [("section", self.section), ("language", self.language)] {
            if let Some(value) = value {
                conditions.push(Condition {
                    condition_one_of: Some(
                        qdrant_client::qdrant::condition::ConditionOneOf::Field(FieldCondition {
                            key: key.to_string(),
                            r#match: Some(Match {
                                match_value: Some(
                                    qdrant_client::qdrant::r#match::MatchValue::Keyword(value),
                                ),
                            }),
                            ..Default::default()
                        }),
                    ),
                });
            }
        }

        Filter {
            must: conditions,
            ..Default::default()
        }
    }
}

/// Similarity search over one corpus
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<(), RagError>;
}

/// Qdrant index configuration
#[derive(Debug, Clone)]
pub struct QdrantIndexConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub api_key: Option<String>,
}

impl Default for QdrantIndexConfig {
    fn default() -> Self {
        Self {
            endpoint: studymate_config::constants::endpoints::QDRANT_DEFAULT.to_string(),
            collection: "course_materials".to_string(),
            vector_dim: studymate_config::constants::models::EMBEDDING_DIM,
            api_key: None,
        }
    }
}

/// Qdrant-backed corpus index
pub struct QdrantIndex {
    client: Qdrant,
    corpus: Corpus,
    config: QdrantIndexConfig,
}

impl QdrantIndex {
    pub async fn new(corpus: Corpus, config: QdrantIndexConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        let index = Self {
            client,
            corpus,
            config,
        };
        index.ensure_collection().await?;
        Ok(index)
    }

    /// Create the collection if it does not exist
    async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;
            tracing::info!(
                collection = %self.config.collection,
                corpus = %self.corpus,
                "created qdrant collection"
            );
        }

        Ok(())
    }

    fn chunk_from_payload(
        &self,
        id: String,
        payload: HashMap<String, qdrant_client::qdrant::Value>,
        score: f32,
    ) -> ScoredChunk {
        let mut text = String::new();
        let mut metadata = ChunkMetadata::default();

        for (k, v) in payload {
            let Some(Kind::StringValue(s)) = v.kind else {
                continue;
            };
            match k.as_str() {
                "text" => text = s,
                "section" => metadata.section = Some(s),
                "language" => metadata.language = Some(s),
                "page" => metadata.page = s.parse().ok(),
                _ => {}
            }
        }

        ScoredChunk {
            chunk: Chunk {
                id,
                text,
                embedding: Vec::new(),
                corpus: self.corpus,
                metadata,
            },
            score,
        }
    }
}

#[async_trait]
impl VectorSearch for QdrantIndex {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let mut search_builder =
            SearchPointsBuilder::new(&self.config.collection, vector.to_vec(), k as u64)
                .with_payload(true);

        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            search_builder = search_builder.filter(f.clone().into_qdrant());
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let scored = results
            .result
            .into_iter()
            .map(|point| {
                let id = point
                    .id
                    .and_then(|pid| match pid.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => Some(u),
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            Some(n.to_string())
                        }
                        None => None,
                    })
                    .unwrap_or_default();
                self.chunk_from_payload(id, point.payload, point.score)
            })
            .collect();

        Ok(scored)
    }

    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<(), RagError> {
        let points: Vec<PointStruct> = chunks
            .into_iter()
            .map(|chunk| {
                let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
                payload.insert("text".to_string(), chunk.text.into());
                payload.insert("corpus".to_string(), chunk.corpus.to_string().into());

                if let Some(section) = chunk.metadata.section {
                    payload.insert("section".to_string(), section.into());
                }
                if let Some(page) = chunk.metadata.page {
                    payload.insert("page".to_string(), page.to_string().into());
                }
                if let Some(language) = chunk.metadata.language {
                    payload.insert("language".to_string(), language.into());
                }

                PointStruct::new(chunk.id, chunk.embedding, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, points))
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(())
    }
}

/// Exact-scan in-memory index
pub struct MemoryIndex {
    corpus: Corpus,
    chunks: RwLock<Vec<Chunk>>,
}

impl MemoryIndex {
    pub fn new(corpus: Corpus) -> Self {
        Self {
            corpus,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorSearch for MemoryIndex {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let chunks = self.chunks.read().await;

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| filter.map_or(true, |f| f.matches(&c.metadata)))
            .map(|c| ScoredChunk {
                score: cosine_similarity(vector, &c.embedding),
                chunk: c.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn upsert(&self, new_chunks: Vec<Chunk>) -> Result<(), RagError> {
        let mut chunks = self.chunks.write().await;
        for chunk in new_chunks {
            if chunk.corpus != self.corpus {
                return Err(RagError::VectorStore(format!(
                    "chunk {} belongs to corpus {}, index holds {}",
                    chunk.id, chunk.corpus, self.corpus
                )));
            }
            if let Some(existing) = chunks.iter_mut().find(|c| c.id == chunk.id) {
                *existing = chunk;
            } else {
                chunks.push(chunk);
            }
        }
        Ok(())
    }
}

/// A corpus index with a short-lived query-result cache in front
///
/// Cache keys cover the query vector, k and the filter, so changing any
/// of them bypasses stale entries. Upserts clear the cache.
pub struct CorpusIndex {
    corpus: Corpus,
    inner: Arc<dyn VectorSearch>,
    cache: TtlCache<Vec<ScoredChunk>>,
}

impl CorpusIndex {
    pub fn new(corpus: Corpus, inner: Arc<dyn VectorSearch>) -> Self {
        use studymate_config::constants::cache;
        Self::with_cache(
            corpus,
            inner,
            cache::QUERY_MAX_ENTRIES,
            Duration::from_secs(cache::QUERY_TTL_SECS),
        )
    }

    pub fn with_cache(
        corpus: Corpus,
        inner: Arc<dyn VectorSearch>,
        cache_size: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            corpus,
            inner,
            cache: TtlCache::new(cache_size, cache_ttl),
        }
    }

    pub fn corpus(&self) -> Corpus {
        self.corpus
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn cache_key(&self, vector: &[f32], k: usize, filter: Option<&SearchFilter>) -> String {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for v in vector {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        format!(
            "{}:{}:{}",
            sha256_hex(&bytes),
            k,
            filter.map(|f| f.fingerprint()).unwrap_or_default()
        )
    }

    pub async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let key = self.cache_key(vector, k, filter);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(corpus = %self.corpus, "query cache hit");
            return Ok(cached);
        }

        let results = self.inner.search(vector, k, filter).await?;
        self.cache.insert(key, results.clone());
        Ok(results)
    }

    pub async fn upsert(&self, chunks: Vec<Chunk>) -> Result<(), RagError> {
        self.inner.upsert(chunks).await?;
        self.cache.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::SimpleEmbedder;

    fn chunk(id: &str, text: &str, corpus: Corpus, section: Option<&str>) -> Chunk {
        let embedder = SimpleEmbedder::new("test", 32);
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            embedding: embedder.embed_sync(text),
            corpus,
            metadata: ChunkMetadata {
                section: section.map(str::to_string),
                page: None,
                language: None,
            },
        }
    }

    #[tokio::test]
    async fn test_memory_index_ranks_by_similarity() {
        let index = MemoryIndex::new(Corpus::Textbook);
        index
            .upsert(vec![
                chunk("t1", "binary search tree insertion", Corpus::Textbook, None),
                chunk("t2", "graph traversal with queues", Corpus::Textbook, None),
            ])
            .await
            .unwrap();

        let embedder = SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("binary search tree insertion");
        let results = index.search(&query, 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "t1");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_memory_index_rejects_foreign_corpus() {
        let index = MemoryIndex::new(Corpus::Course);
        let err = index
            .upsert(vec![chunk("t1", "text", Corpus::Textbook, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::VectorStore(_)));
    }

    #[tokio::test]
    async fn test_filter_restricts_results() {
        let index = MemoryIndex::new(Corpus::Course);
        index
            .upsert(vec![
                chunk("c1", "sorting lecture", Corpus::Course, Some("MODULE 1")),
                chunk("c2", "sorting assignment", Corpus::Course, Some("MODULE 2")),
            ])
            .await
            .unwrap();

        let embedder = SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("sorting");
        let filter = SearchFilter::new().section("MODULE 2");
        let results = index.search(&query, 5, Some(&filter)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "c2");
    }

    #[tokio::test]
    async fn test_corpus_index_caches_and_invalidates() {
        let inner = Arc::new(MemoryIndex::new(Corpus::Course));
        inner
            .upsert(vec![chunk("c1", "recursion basics", Corpus::Course, None)])
            .await
            .unwrap();
        let index = CorpusIndex::new(Corpus::Course, inner);

        let embedder = SimpleEmbedder::new("test", 32);
        let query = embedder.embed_sync("recursion");

        index.search(&query, 3, None).await.unwrap();
        index.search(&query, 3, None).await.unwrap();
        assert_eq!(index.cache_stats().hits, 1);

        // Upsert invalidates cached results
        index
            .upsert(vec![chunk("c2", "recursion depth", Corpus::Course, None)])
            .await
            .unwrap();
        let results = index.search(&query, 3, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_filter_fingerprint_distinguishes_fields() {
        let a = SearchFilter::new().section("MODULE 1");
        let b = SearchFilter::new().language("MODULE 1");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
