//! Retrievable knowledge types
//!
//! A `Chunk` is the immutable unit of retrievable text, created at
//! ingestion time. The query engine only ever reads chunks.

use serde::{Deserialize, Serialize};

/// Knowledge corpus a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    /// Instructor-authored course materials (syllabus, modules, schedule)
    Course,
    /// Reference textbook
    Textbook,
}

impl Corpus {
    /// Human-readable label used when rendering context for the model
    pub fn label(&self) -> &'static str {
        match self {
            Corpus::Course => "Course Materials",
            Corpus::Textbook => "Textbook",
        }
    }
}

impl std::fmt::Display for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Corpus::Course => write!(f, "course"),
            Corpus::Textbook => write!(f, "textbook"),
        }
    }
}

/// Caller-supplied corpus preference, overriding the question classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusHint {
    Course,
    Textbook,
}

/// Citation metadata attached to a chunk at ingestion time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Module or chapter label (e.g. "MODULE 1", "Chapter 7")
    pub section: Option<String>,
    /// Page number in the source document
    pub page: Option<u32>,
    /// Language tag ("en", "bn", ...)
    pub language: Option<String>,
}

/// Immutable unit of retrievable text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable, corpus-scoped identifier
    pub id: String,
    /// Chunk text
    pub text: String,
    /// Fixed-length embedding vector
    pub embedding: Vec<f32>,
    /// Owning corpus
    pub corpus: Corpus,
    /// Citation metadata
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// A chunk paired with its similarity score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Similarity score from the index (cosine or inner product)
    pub score: f32,
}

impl ScoredChunk {
    /// Origin corpus of the underlying chunk
    pub fn source(&self) -> Corpus {
        self.chunk.corpus
    }
}

/// Ordered retrieval result, at most `k` chunks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    items: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(items: Vec<ScoredChunk>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredChunk> {
        self.items.iter()
    }

    /// Look up a chunk by id
    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.items
            .iter()
            .find(|s| s.chunk.id == chunk_id)
            .map(|s| &s.chunk)
    }

    /// Whether a chunk id was part of this retrieval
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.get(chunk_id).is_some()
    }

    /// Number of chunks originating from the given corpus
    pub fn count_from(&self, corpus: Corpus) -> usize {
        self.items.iter().filter(|s| s.source() == corpus).count()
    }
}

impl IntoIterator for RetrievalResult {
    type Item = ScoredChunk;
    type IntoIter = std::vec::IntoIter<ScoredChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
