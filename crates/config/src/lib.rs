//! Configuration management for the studymate tutoring engine
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (STUDYMATE_ prefix)
//! - Built-in defaults (see [`constants`])

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, EmbeddingSettings, EngineSettings, LlmSettings, ModelSettings,
    RetrievalSettings, RuntimeEnvironment, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
