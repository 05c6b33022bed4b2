//! RAG orchestrator
//!
//! One `answer()` call runs the full pipeline. The response cache is
//! consulted before admission, identical concurrent questions share one
//! pipeline run, and the worker pool is bounded: a request that cannot
//! get a permit within the queue wait is rejected with `Overloaded`.
//!
//! Only validated answers are written to the response cache. Empty
//! retrievals and unverified (uncited) answers are returned but never
//! cached, so a later identical question gets a fresh attempt.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use studymate_config::EngineSettings;
use studymate_core::{Answer, CorpusHint, Error, Result, Turn};
use studymate_llm::{CitationValidator, FallbackChain, PromptBuilder, Validation};
use studymate_rag::{EmbeddingProvider, RetrievalMerger, SearchFilter, SingleFlight, TtlCache};

use crate::fingerprint::fingerprint;

/// Pipeline step, surfaced in trace output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Embedding,
    Retrieving,
    Generating,
    Validating,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::Generating => "generating",
            Stage::Validating => "validating",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// One question from the caller
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    /// Prior turns, oldest first; used only for prompt assembly
    pub history: Vec<Turn>,
    /// Overrides the question classifier when set
    pub corpus_hint: Option<CorpusHint>,
    /// Preferred embedding model language
    pub language_hint: Option<String>,
    /// Metadata filter applied to both corpora
    pub filter: Option<SearchFilter>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            corpus_hint: None,
            language_hint: None,
            filter: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_corpus_hint(mut self, hint: CorpusHint) -> Self {
        self.corpus_hint = Some(hint);
        self
    }

    pub fn with_language_hint(mut self, language: impl Into<String>) -> Self {
        self.language_hint = Some(language.into());
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Engine statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub requests: u64,
    pub cache_hits: u64,
    /// Questions where neither corpus had relevant chunks
    pub retrieval_empty: u64,
    /// Answers returned unverified after the citation retry also failed
    pub uncited_answers: u64,
    /// Requests rejected by admission control
    pub overloads: u64,
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent: usize,
    /// Maximum wait for a worker permit before rejecting
    pub max_queue_wait: Duration,
    pub response_cache_size: usize,
    pub response_cache_ttl: Duration,
    /// Returned when neither corpus has relevant chunks
    pub no_information_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        use studymate_config::constants::{cache, engine, timeouts};
        Self {
            max_concurrent: engine::MAX_CONCURRENT_GENERATIONS,
            max_queue_wait: Duration::from_millis(timeouts::QUEUE_WAIT_MS),
            response_cache_size: cache::RESPONSE_MAX_ENTRIES,
            response_cache_ttl: Duration::from_secs(cache::RESPONSE_TTL_SECS),
            no_information_message: engine::NO_INFORMATION_MESSAGE.to_string(),
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent_generations,
            max_queue_wait: Duration::from_millis(settings.max_queue_wait_ms),
            response_cache_size: settings.response_cache_size,
            response_cache_ttl: Duration::from_secs(settings.response_cache_ttl_secs),
            no_information_message: settings.no_information_message.clone(),
        }
    }
}

/// The query engine
pub struct RagEngine {
    embedder: EmbeddingProvider,
    merger: RetrievalMerger,
    chain: FallbackChain,
    prompts: PromptBuilder,
    validator: CitationValidator,
    response_cache: TtlCache<Answer>,
    flight: SingleFlight<Answer>,
    admission: Arc<Semaphore>,
    /// Model lineup identity, part of every fingerprint
    chain_id: String,
    config: EngineConfig,
    stats: Mutex<EngineStats>,
}

impl RagEngine {
    pub fn new(
        embedder: EmbeddingProvider,
        merger: RetrievalMerger,
        chain: FallbackChain,
        prompts: PromptBuilder,
        config: EngineConfig,
    ) -> Result<Self> {
        if config.max_concurrent == 0 {
            return Err(Error::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        let chain_id = chain.model_names().join(">");
        Ok(Self {
            embedder,
            merger,
            chain,
            prompts,
            validator: CitationValidator::new(),
            response_cache: TtlCache::new(config.response_cache_size, config.response_cache_ttl),
            flight: SingleFlight::new(),
            admission: Arc::new(Semaphore::new(config.max_concurrent)),
            chain_id,
            config,
            stats: Mutex::new(EngineStats::default()),
        })
    }

    pub fn stats(&self) -> EngineStats {
        *self.stats.lock()
    }

    /// Chain-level statistics (fallbacks, model switches)
    pub fn chain_stats(&self) -> studymate_llm::ChainStats {
        self.chain.stats()
    }

    /// Answer one question end to end
    pub async fn answer(&self, request: QueryRequest) -> Result<Answer> {
        self.stats.lock().requests += 1;
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("answer", %request_id);

        async {
            tracing::debug!(stage = %Stage::Received, question = %request.question);

            let key = fingerprint(
                &request.question,
                &self.chain_id,
                request.corpus_hint,
                request.language_hint.as_deref(),
                request.filter.as_ref(),
            );

            if let Some(answer) = self.response_cache.get(&key) {
                self.stats.lock().cache_hits += 1;
                tracing::debug!(stage = %Stage::Done, "served from response cache");
                return Ok(answer);
            }

            // Identical concurrent questions share one pipeline run
            self.flight
                .run(&key, || self.pipeline(&request, &key))
                .await
        }
        .instrument(span)
        .await
    }

    async fn pipeline(&self, request: &QueryRequest, key: &str) -> Result<Answer> {
        let wait = self.config.max_queue_wait;
        let _permit = match tokio::time::timeout(wait, self.admission.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Internal("admission semaphore closed".to_string())),
            Err(_) => {
                self.stats.lock().overloads += 1;
                tracing::warn!(waited_ms = wait.as_millis() as u64, "request rejected");
                return Err(Error::Overloaded {
                    waited_ms: wait.as_millis() as u64,
                });
            }
        };

        tracing::debug!(stage = %Stage::Embedding);
        let vector = self
            .embedder
            .embed(&request.question, request.language_hint.as_deref())
            .await
            .map_err(Error::from)?;

        tracing::debug!(stage = %Stage::Retrieving);
        let retrieval = self
            .merger
            .retrieve(
                &request.question,
                &vector,
                request.corpus_hint,
                request.filter.as_ref(),
            )
            .await
            .map_err(Error::from)?;

        if retrieval.is_empty() {
            self.stats.lock().retrieval_empty += 1;
            tracing::debug!(stage = %Stage::Done, "no relevant chunks in either corpus");
            return Ok(Answer::no_information(
                self.config.no_information_message.clone(),
            ));
        }

        tracing::debug!(stage = %Stage::Generating, chunks = retrieval.len());
        let messages = self
            .prompts
            .build(&request.question, &retrieval, &request.history);
        let first = self.chain.generate(&messages).await.map_err(Error::from)?;

        tracing::debug!(stage = %Stage::Validating, model = %first.model);
        let reason = match self.validator.validate(&first.output.text, &retrieval) {
            Validation::Valid { citations } => {
                let answer = Answer {
                    text: first.output.text,
                    citations,
                    uncited: false,
                    retrieval_empty: false,
                    model: Some(first.model),
                };
                self.response_cache.insert(key, answer.clone());
                tracing::debug!(stage = %Stage::Done);
                return Ok(answer);
            }
            Validation::Invalid { reason } => reason,
        };

        // One retry with the stricter reminder
        tracing::debug!(%reason, "citations rejected, retrying");
        let retry_messages =
            self.prompts
                .build_with_reminder(&request.question, &retrieval, &request.history);
        let second = self
            .chain
            .generate(&retry_messages)
            .await
            .map_err(Error::from)?;

        match self.validator.validate(&second.output.text, &retrieval) {
            Validation::Valid { citations } => {
                let answer = Answer {
                    text: second.output.text,
                    citations,
                    uncited: false,
                    retrieval_empty: false,
                    model: Some(second.model),
                };
                self.response_cache.insert(key, answer.clone());
                tracing::debug!(stage = %Stage::Done);
                Ok(answer)
            }
            Validation::Invalid { reason } => {
                self.stats.lock().uncited_answers += 1;
                tracing::warn!(%reason, "returning unverified answer");
                let citations = self.validator.salvage(&second.output.text, &retrieval);
                Ok(Answer {
                    text: second.output.text,
                    citations,
                    uncited: true,
                    retrieval_empty: false,
                    model: Some(second.model),
                })
            }
        }
    }
}
