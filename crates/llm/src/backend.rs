//! Model backends
//!
//! A `TextModel` turns a message list into one completion. The Ollama
//! implementation uses the non-streaming `/api/chat` endpoint; answers
//! here are short (a tutoring reply, not an essay) so streaming buys
//! nothing over a single response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::prompt::Message;
use crate::LlmError;

/// Generation parameters for one backend
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Model name as known to the serving runtime
    pub model: String,
    /// API endpoint
    pub endpoint: String,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// Request timeout
    pub timeout: Duration,
    /// How long the runtime keeps the model loaded between calls
    pub keep_alive: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        use studymate_config::constants::{endpoints, generation, models, timeouts};
        Self {
            model: models::PREFERRED_LLM.to_string(),
            endpoint: endpoints::OLLAMA_DEFAULT.to_string(),
            max_tokens: generation::MAX_TOKENS,
            temperature: generation::TEMPERATURE,
            top_p: generation::TOP_P,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            keep_alive: "5m".to_string(),
        }
    }
}

impl GenerationConfig {
    /// Per-model configuration from the loaded settings
    pub fn for_model(
        llm: &studymate_config::LlmSettings,
        model: &studymate_config::ModelSettings,
    ) -> Self {
        Self {
            model: model.name.clone(),
            endpoint: llm.endpoint.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            top_p: llm.top_p,
            timeout: Duration::from_millis(model.timeout_ms),
            keep_alive: "5m".to_string(),
        }
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
}

/// One completed generation
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    /// Tokens generated, when the runtime reports them
    pub tokens: usize,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

/// A language model that completes a chat-style message list
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationOutput, LlmError>;

    /// Whether the model can currently serve requests
    async fn is_available(&self) -> bool;

    /// Model name as used in citations of the serving model
    fn name(&self) -> &str;
}

/// Rough token estimate for budget checks
///
/// Bangla script runs ~2 graphemes per token, Latin ~4 characters.
pub fn estimate_tokens(text: &str) -> usize {
    use unicode_segmentation::UnicodeSegmentation;

    let graphemes = text.graphemes(true).count();
    let bangla = text
        .chars()
        .filter(|c| ('\u{0980}'..='\u{09FF}').contains(c))
        .count();

    if bangla > graphemes / 3 {
        graphemes.max(1) / 2
    } else {
        graphemes.max(1) / 4
    }
}

/// Ollama chat backend
pub struct OllamaModel {
    client: Client,
    config: GenerationConfig,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    keep_alive: String,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.to_string(),
            content: m.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: i32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    done: bool,
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaTag>,
}

#[derive(Deserialize)]
struct OllamaTag {
    name: String,
}

impl OllamaModel {
    pub fn new(config: GenerationConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("http client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint, path)
    }
}

#[async_trait]
impl TextModel for OllamaModel {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationOutput, LlmError> {
        let start = std::time::Instant::now();

        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(Into::into).collect(),
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens as i32,
            },
            keep_alive: self.config.keep_alive.clone(),
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {}: {}", status, body)));
            }
            return Err(LlmError::Api(format!("{}: {}", status, body)));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(GenerationOutput {
            text: parsed.message.content,
            tokens: parsed.eval_count.unwrap_or(0) as usize,
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: if parsed.done {
                FinishReason::Stop
            } else {
                FinishReason::Length
            },
        })
    }

    async fn is_available(&self) -> bool {
        let response = match self.client.get(self.api_url("/tags")).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return false,
        };

        match response.json::<OllamaTagsResponse>().await {
            Ok(tags) => tags
                .models
                .iter()
                .any(|t| t.name.starts_with(&self.config.model)),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_english() {
        // ~4 chars per token
        let text = "explain how quicksort partitions an array";
        let estimate = estimate_tokens(text);
        assert!(estimate >= 8 && estimate <= 12, "estimate was {}", estimate);
    }

    #[test]
    fn test_estimate_tokens_bangla() {
        // Bangla text lands on the denser estimate
        let text = "\u{09AC}\u{09BE}\u{0982}\u{09B2}\u{09BE} \u{09AD}\u{09BE}\u{09B7}\u{09BE}";
        assert!(estimate_tokens(text) >= 1);
    }

    #[test]
    fn test_message_conversion() {
        let message = Message::user("What is a heap?");
        let ollama: OllamaMessage = (&message).into();
        assert_eq!(ollama.role, "user");
        assert_eq!(ollama.content, "What is a heap?");
    }
}
