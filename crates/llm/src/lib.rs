//! Language model integration
//!
//! Features:
//! - Ollama chat backend (non-streaming)
//! - Priority-ordered fallback chain with per-model health tracking
//! - Prompt building with a citation mandate and context budgeting
//! - Citation marker validation against the retrieval that produced them

pub mod backend;
pub mod chain;
pub mod citation;
pub mod prompt;

pub use backend::{
    FinishReason, GenerationConfig, GenerationOutput, OllamaModel, TextModel,
};
pub use chain::{ChainOutput, ChainStats, FallbackChain, Health, ModelDescriptor};
pub use citation::{CitationValidator, InvalidReason, Validation};
pub use prompt::{Message, PromptBuilder, QueryTemplate, Role};

use studymate_core::ModelFailure;
use thiserror::Error;

/// Language model errors
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every model in the chain failed or timed out
    #[error("all models exhausted")]
    Exhausted(Vec<ModelFailure>),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for studymate_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Exhausted(failures) => studymate_core::Error::AllModelsExhausted(failures),
            LlmError::Configuration(msg) => studymate_core::Error::Configuration(msg),
            other => studymate_core::Error::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_maps_to_core_error() {
        let err: studymate_core::Error = LlmError::Exhausted(vec![ModelFailure {
            model: "qwen2:1.5b".to_string(),
            reason: "timeout".to_string(),
        }])
        .into();
        assert!(matches!(
            err,
            studymate_core::Error::AllModelsExhausted(ref f) if f.len() == 1
        ));
    }
}
