//! Query orchestration
//!
//! Ties retrieval and generation into one `answer()` call: response
//! cache, admission control, embedding, dual-corpus retrieval, model
//! fallback, citation validation with a single retry.

pub mod factory;
pub mod fingerprint;
pub mod orchestrator;

pub use factory::engine_from_settings;
pub use fingerprint::fingerprint;
pub use orchestrator::{EngineConfig, EngineStats, QueryRequest, RagEngine, Stage};

/// Install the global tracing subscriber, filtered by `RUST_LOG`
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("studymate=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
