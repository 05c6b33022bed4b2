//! Core types for the studymate tutoring engine
//!
//! This crate provides the foundational types shared across all other crates:
//! - Chunk and corpus types for retrievable knowledge
//! - Retrieval results and citations
//! - The answer envelope returned to callers
//! - Conversation turns supplied by the caller
//! - Error types

pub mod answer;
pub mod chunk;
pub mod conversation;
pub mod error;

pub use answer::{Answer, Citation};
pub use chunk::{Chunk, ChunkMetadata, Corpus, CorpusHint, RetrievalResult, ScoredChunk};
pub use conversation::{Turn, TurnRole};
pub use error::{Error, ModelFailure, Result};
