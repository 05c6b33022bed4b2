//! Dual-corpus retrieval
//!
//! Features:
//! - Embedding provider with model fallback and content-addressed caching
//! - Vector search over qdrant (or an in-memory index) per corpus
//! - Short-lived query-result caching
//! - Question classification and source-priority result merging
//! - Single-flight coalescing of identical in-flight computations

pub mod cache;
pub mod embedder;
pub mod index;
pub mod merger;

pub use cache::{CacheEntry, CacheStats, SingleFlight, TtlCache};
pub use embedder::{
    EmbeddingBackend, EmbeddingProvider, EmbeddingProviderConfig, OllamaEmbedder,
    OllamaEmbedderConfig, SimpleEmbedder, TermExpander,
};
pub use index::{CorpusIndex, MemoryIndex, QdrantIndex, QdrantIndexConfig, SearchFilter, VectorSearch};
pub use merger::{MergePlan, MergerConfig, QuestionClassifier, QuestionKind, RetrievalMerger};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug, Clone)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("all embedding models failed: {0}")]
    EmbeddingUnavailable(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<RagError> for studymate_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::EmbeddingUnavailable(reasons) => {
                studymate_core::Error::EmbeddingUnavailable(reasons)
            }
            other => studymate_core::Error::Internal(other.to_string()),
        }
    }
}

/// Hex sha256 digest, used for content-addressed cache keys
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
