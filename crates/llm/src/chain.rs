//! Priority-ordered model fallback chain
//!
//! Models are tried in priority order under a per-attempt timeout.
//! Each model carries a health value: consecutive failures past the
//! threshold put it on cool-down, a success resets it. A model on
//! cool-down is skipped until the cool-down expires, at which point
//! the next request probes it again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use studymate_core::ModelFailure;

use crate::backend::{GenerationOutput, TextModel};
use crate::prompt::Message;
use crate::LlmError;

/// Static description of one chain member
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: String,
    /// Lower value is tried first
    pub priority: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Consecutive failures before the model goes on cool-down
    pub failure_threshold: u32,
    /// Cool-down before the model is probed again
    pub cooldown: Duration,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        use studymate_config::constants::{generation, timeouts};
        Self {
            name: name.into(),
            priority,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
            failure_threshold: generation::FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(generation::COOLDOWN_SECS),
        }
    }
}

impl From<&studymate_config::ModelSettings> for ModelDescriptor {
    fn from(settings: &studymate_config::ModelSettings) -> Self {
        Self {
            name: settings.name.clone(),
            priority: settings.priority as u32,
            timeout: Duration::from_millis(settings.timeout_ms),
            failure_threshold: settings.failure_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
        }
    }
}

/// Model health state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Serving normally
    Available,
    /// Recent failures below the threshold
    Degraded,
    /// On cool-down until the given instant
    Unavailable { until: Instant },
}

struct HealthState {
    health: Health,
    consecutive_failures: u32,
}

struct ChainMember {
    descriptor: ModelDescriptor,
    backend: Arc<dyn TextModel>,
    state: Mutex<HealthState>,
}

impl ChainMember {
    /// Whether this member should be attempted right now
    fn admissible(&self) -> bool {
        let mut state = self.state.lock();
        match state.health {
            Health::Available | Health::Degraded => true,
            Health::Unavailable { until } => {
                if Instant::now() >= until {
                    // Cool-down expired, probe again
                    state.health = Health::Degraded;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.health = Health::Available;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.descriptor.failure_threshold {
            let until = Instant::now() + self.descriptor.cooldown;
            state.health = Health::Unavailable { until };
            tracing::warn!(
                model = %self.descriptor.name,
                failures = state.consecutive_failures,
                cooldown_secs = self.descriptor.cooldown.as_secs(),
                "model placed on cool-down"
            );
        } else {
            state.health = Health::Degraded;
        }
    }
}

/// Chain statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub requests: u64,
    /// Requests not served by the highest-priority model
    pub fallbacks: u64,
    /// Requests where every model failed
    pub exhaustions: u64,
    /// Times the serving model differed from the previous request's
    pub model_switches: u64,
    pub last_model: Option<String>,
}

/// One successful chain generation
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// Name of the model that served the response
    pub model: String,
    pub output: GenerationOutput,
}

/// Priority-ordered fallback chain over text models
pub struct FallbackChain {
    members: Vec<ChainMember>,
    stats: Mutex<ChainStats>,
}

impl FallbackChain {
    /// Members are sorted by descriptor priority, lowest first
    pub fn new(models: Vec<(ModelDescriptor, Arc<dyn TextModel>)>) -> Result<Self, LlmError> {
        if models.is_empty() {
            return Err(LlmError::Configuration(
                "fallback chain needs at least one model".to_string(),
            ));
        }

        let mut members: Vec<ChainMember> = models
            .into_iter()
            .map(|(descriptor, backend)| ChainMember {
                descriptor,
                backend,
                state: Mutex::new(HealthState {
                    health: Health::Available,
                    consecutive_failures: 0,
                }),
            })
            .collect();
        members.sort_by_key(|m| m.descriptor.priority);

        Ok(Self {
            members,
            stats: Mutex::new(ChainStats::default()),
        })
    }

    pub fn stats(&self) -> ChainStats {
        self.stats.lock().clone()
    }

    /// Current health of a model, by name
    pub fn health(&self, model: &str) -> Option<Health> {
        self.members
            .iter()
            .find(|m| m.descriptor.name == model)
            .map(|m| m.state.lock().health)
    }

    /// Model names in priority order
    pub fn model_names(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.descriptor.name.clone())
            .collect()
    }

    /// Try each admissible model in priority order until one succeeds
    pub async fn generate(&self, messages: &[Message]) -> Result<ChainOutput, LlmError> {
        self.stats.lock().requests += 1;

        let mut failures: Vec<ModelFailure> = Vec::new();

        for (rank, member) in self.members.iter().enumerate() {
            if !member.admissible() {
                failures.push(ModelFailure {
                    model: member.descriptor.name.clone(),
                    reason: "on cool-down".to_string(),
                });
                continue;
            }

            let attempt =
                tokio::time::timeout(member.descriptor.timeout, member.backend.generate(messages))
                    .await;

            match attempt {
                Ok(Ok(output)) => {
                    member.record_success();
                    self.record_served(&member.descriptor.name, rank > 0);
                    return Ok(ChainOutput {
                        model: member.descriptor.name.clone(),
                        output,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(model = %member.descriptor.name, error = %e, "model failed");
                    member.record_failure();
                    failures.push(ModelFailure {
                        model: member.descriptor.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        model = %member.descriptor.name,
                        timeout_ms = member.descriptor.timeout.as_millis() as u64,
                        "model timed out"
                    );
                    member.record_failure();
                    failures.push(ModelFailure {
                        model: member.descriptor.name.clone(),
                        reason: "timeout".to_string(),
                    });
                }
            }
        }

        self.stats.lock().exhaustions += 1;
        Err(LlmError::Exhausted(failures))
    }

    fn record_served(&self, model: &str, fell_back: bool) {
        let mut stats = self.stats.lock();
        if fell_back {
            stats.fallbacks += 1;
        }
        if stats.last_model.as_deref() != Some(model) && stats.last_model.is_some() {
            stats.model_switches += 1;
        }
        stats.last_model = Some(model.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FinishReason;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `fail_first` calls, then succeeds
    struct FlakyModel {
        name: String,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl FlakyModel {
        fn new(name: &str, fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_first,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextModel for FlakyModel {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationOutput, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(LlmError::Network("connection refused".to_string()));
            }
            Ok(GenerationOutput {
                text: format!("answer from {}", self.name),
                tokens: 10,
                total_time_ms: 1,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn descriptor(name: &str, priority: u32, threshold: u32, cooldown: Duration) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            priority,
            timeout: Duration::from_secs(5),
            failure_threshold: threshold,
            cooldown,
        }
    }

    fn question() -> Vec<Message> {
        vec![Message::user("what is a heap?")]
    }

    #[tokio::test]
    async fn test_first_model_serves() {
        let chain = FallbackChain::new(vec![
            (
                descriptor("primary", 0, 3, Duration::from_secs(60)),
                FlakyModel::new("primary", 0) as Arc<dyn TextModel>,
            ),
            (
                descriptor("backup", 1, 3, Duration::from_secs(60)),
                FlakyModel::new("backup", 0) as Arc<dyn TextModel>,
            ),
        ])
        .unwrap();

        let result = chain.generate(&question()).await.unwrap();
        assert_eq!(result.model, "primary");
        assert_eq!(chain.stats().fallbacks, 0);
    }

    #[tokio::test]
    async fn test_falls_back_on_failure() {
        let chain = FallbackChain::new(vec![
            (
                descriptor("primary", 0, 3, Duration::from_secs(60)),
                FlakyModel::new("primary", 100) as Arc<dyn TextModel>,
            ),
            (
                descriptor("backup", 1, 3, Duration::from_secs(60)),
                FlakyModel::new("backup", 0) as Arc<dyn TextModel>,
            ),
        ])
        .unwrap();

        let result = chain.generate(&question()).await.unwrap();
        assert_eq!(result.model, "backup");
        assert_eq!(chain.stats().fallbacks, 1);
        assert_eq!(chain.health("primary"), Some(Health::Degraded));
    }

    #[tokio::test]
    async fn test_threshold_puts_model_on_cooldown() {
        let chain = FallbackChain::new(vec![
            (
                descriptor("primary", 0, 2, Duration::from_secs(60)),
                FlakyModel::new("primary", 100) as Arc<dyn TextModel>,
            ),
            (
                descriptor("backup", 1, 3, Duration::from_secs(60)),
                FlakyModel::new("backup", 0) as Arc<dyn TextModel>,
            ),
        ])
        .unwrap();

        chain.generate(&question()).await.unwrap();
        chain.generate(&question()).await.unwrap();
        assert!(matches!(
            chain.health("primary"),
            Some(Health::Unavailable { .. })
        ));

        // Third request skips primary entirely
        let result = chain.generate(&question()).await.unwrap();
        assert_eq!(result.model, "backup");
        assert_eq!(chain.stats().fallbacks, 3);
    }

    #[tokio::test]
    async fn test_cooldown_expiry_probes_again() {
        let primary = FlakyModel::new("primary", 2);
        let chain = FallbackChain::new(vec![
            (
                descriptor("primary", 0, 2, Duration::from_millis(10)),
                primary.clone() as Arc<dyn TextModel>,
            ),
            (
                descriptor("backup", 1, 3, Duration::from_secs(60)),
                FlakyModel::new("backup", 0) as Arc<dyn TextModel>,
            ),
        ])
        .unwrap();

        chain.generate(&question()).await.unwrap();
        chain.generate(&question()).await.unwrap();
        assert!(matches!(
            chain.health("primary"),
            Some(Health::Unavailable { .. })
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Probe succeeds and health resets
        let result = chain.generate(&question()).await.unwrap();
        assert_eq!(result.model, "primary");
        assert_eq!(chain.health("primary"), Some(Health::Available));
    }

    #[tokio::test]
    async fn test_exhaustion_carries_all_reasons() {
        let chain = FallbackChain::new(vec![
            (
                descriptor("primary", 0, 3, Duration::from_secs(60)),
                FlakyModel::new("primary", 100) as Arc<dyn TextModel>,
            ),
            (
                descriptor("backup", 1, 3, Duration::from_secs(60)),
                FlakyModel::new("backup", 100) as Arc<dyn TextModel>,
            ),
        ])
        .unwrap();

        let err = chain.generate(&question()).await.unwrap_err();
        match err {
            LlmError::Exhausted(failures) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].model, "primary");
                assert_eq!(failures[1].model, "backup");
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(chain.stats().exhaustions, 1);
    }

    #[tokio::test]
    async fn test_model_switch_counting() {
        let primary = FlakyModel::new("primary", 1);
        let chain = FallbackChain::new(vec![
            (
                descriptor("primary", 0, 5, Duration::from_secs(60)),
                primary as Arc<dyn TextModel>,
            ),
            (
                descriptor("backup", 1, 5, Duration::from_secs(60)),
                FlakyModel::new("backup", 0) as Arc<dyn TextModel>,
            ),
        ])
        .unwrap();

        // First request falls back to backup, second is served by primary
        chain.generate(&question()).await.unwrap();
        chain.generate(&question()).await.unwrap();

        let stats = chain.stats();
        assert_eq!(stats.last_model.as_deref(), Some("primary"));
        assert_eq!(stats.model_switches, 1);
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(matches!(
            FallbackChain::new(Vec::new()),
            Err(LlmError::Configuration(_))
        ));
    }
}
