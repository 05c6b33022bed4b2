//! Engine assembly from loaded settings
//!
//! Builds the production wiring: Ollama embedding models in fallback
//! order, one qdrant collection per corpus, and the Ollama model chain.
//! Tests wire the engine by hand with in-memory parts instead.

use std::sync::Arc;

use studymate_config::Settings;
use studymate_core::{Corpus, Error, Result};
use studymate_llm::backend::{GenerationConfig, OllamaModel, TextModel};
use studymate_llm::{FallbackChain, ModelDescriptor, PromptBuilder};
use studymate_rag::{
    CorpusIndex, EmbeddingBackend, EmbeddingProvider, OllamaEmbedder, OllamaEmbedderConfig,
    QdrantIndex, QdrantIndexConfig, QuestionClassifier, RetrievalMerger,
};

use crate::orchestrator::{EngineConfig, RagEngine};

fn embedding_provider(settings: &Settings) -> Result<EmbeddingProvider> {
    let embedding = &settings.embedding;
    let mut backends: Vec<Arc<dyn EmbeddingBackend>> = Vec::new();
    for model in [&embedding.primary_model, &embedding.fallback_model] {
        let config = OllamaEmbedderConfig::for_model(embedding, model, Vec::new());
        let backend =
            OllamaEmbedder::new(config).map_err(|e| Error::Configuration(e.to_string()))?;
        backends.push(Arc::new(backend));
    }

    Ok(EmbeddingProvider::new(backends, (&settings.embedding).into()))
}

async fn corpus_index(settings: &Settings, corpus: Corpus, collection: &str) -> Result<CorpusIndex> {
    let retrieval = &settings.retrieval;
    let index = QdrantIndex::new(
        corpus,
        QdrantIndexConfig {
            endpoint: retrieval.qdrant_endpoint.clone(),
            collection: collection.to_string(),
            vector_dim: settings.embedding.dimension,
            api_key: None,
        },
    )
    .await
    .map_err(Error::from)?;

    Ok(CorpusIndex::with_cache(
        corpus,
        Arc::new(index),
        retrieval.query_cache_size,
        std::time::Duration::from_secs(retrieval.query_cache_ttl_secs),
    ))
}

fn model_chain(settings: &Settings) -> Result<FallbackChain> {
    let llm = &settings.llm;
    let mut members: Vec<(ModelDescriptor, Arc<dyn TextModel>)> = Vec::new();
    for model in &llm.models {
        let backend = OllamaModel::new(GenerationConfig::for_model(llm, model))
            .map_err(|e| Error::Configuration(e.to_string()))?;
        members.push((ModelDescriptor::from(model), Arc::new(backend)));
    }

    FallbackChain::new(members).map_err(Error::from)
}

/// Build a ready-to-serve engine from validated settings
pub async fn engine_from_settings(settings: &Settings) -> Result<RagEngine> {
    let embedder = embedding_provider(settings)?;

    let course = corpus_index(
        settings,
        Corpus::Course,
        &settings.retrieval.course_collection,
    )
    .await?;
    let textbook = corpus_index(
        settings,
        Corpus::Textbook,
        &settings.retrieval.textbook_collection,
    )
    .await?;

    let merger = RetrievalMerger::new(
        Arc::new(course),
        Arc::new(textbook),
        (&settings.retrieval).into(),
    )
    .with_classifier(QuestionClassifier::new(
        settings.retrieval.course_keywords.clone(),
    ));

    let chain = model_chain(settings)?;
    let prompts = PromptBuilder::new(settings.engine.max_context_tokens);

    RagEngine::new(embedder, merger, chain, prompts, (&settings.engine).into())
}
