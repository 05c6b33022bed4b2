//! Error types surfaced to callers
//!
//! Component-local transient failures (a single model timeout, a cache
//! miss) are handled inside the owning component and never reach this
//! enum. Only chain exhaustion, total unavailability and admission
//! rejection bubble up.

use thiserror::Error;

/// Per-model failure reason, carried by [`Error::AllModelsExhausted`]
/// for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub model: String,
    pub reason: String,
}

impl std::fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.model, self.reason)
    }
}

/// Terminal errors returned by the query engine
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Every embedding model failed; the question cannot be processed
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Every model in the fallback chain failed or timed out
    #[error("all models exhausted ({})", format_failures(.0))]
    AllModelsExhausted(Vec<ModelFailure>),

    /// Admission control rejected the request; retry later
    #[error("engine overloaded, request rejected after waiting {waited_ms}ms")]
    Overloaded { waited_ms: u64 },

    /// Bad configuration detected at construction time
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
