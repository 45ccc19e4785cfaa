use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use super::config::ModelRouterSettings;

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Cloud model picked for hard or urgent work.
const HIGH_TIER_MODEL: &str = "claude-sonnet-4";
/// Mid-cost cloud default.
const DEFAULT_MODEL: &str = "claude-3-7-sonnet";

#[derive(Debug, Error)]
pub enum ModelRouterError {
    #[error("No registered model can handle this task")]
    NoEligibleModel,
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("Provider {0} is not configured (missing API key)")]
    ProviderNotConfigured(String),
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Provider request failed: {0}")]
    Http(String),
    #[error("Provider returned an unexpected response: {0}")]
    Parse(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Code,
    Analysis,
    Reasoning,
    Completion,
    Vision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Abstract description of the work a completion request represents.
#[derive(Debug, Clone, Deserialize, TS)]
pub struct TaskDescriptor {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub complexity: TaskLevel,
    #[serde(default)]
    pub urgency: TaskLevel,
    pub tokens: u32,
    #[serde(default)]
    pub prefer_local: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ModelConfig {
    /// Registry key, e.g. "claude-sonnet-4".
    pub key: String,
    /// Provider-facing model name, e.g. "claude-sonnet-4-20250514".
    pub name: String,
    pub provider: ProviderKind,
    pub max_tokens: u32,
    pub cost_per_token: f64,
    pub capabilities: Vec<TaskType>,
    pub local: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Provider-normalized result. Local runtimes report zero tokens and cost.
#[derive(Debug, Clone, Serialize, TS)]
pub struct Completion {
    pub content: String,
    pub tokens: u32,
    pub cost: f64,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Whether the backend has what it needs (usually an API key). An
    /// unconfigured backend disables its models instead of failing calls.
    fn is_configured(&self) -> bool;

    async fn chat(
        &self,
        model: &ModelConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, ModelRouterError>;
}

/// Decouples the orchestrator from concrete LLM providers: a registry of
/// known models, a priority-list routing rule, and normalized completion
/// calls with a single local-to-cloud fallback.
#[derive(Clone)]
pub struct ModelRouter {
    registry: Vec<ModelConfig>,
    backends: HashMap<ProviderKind, Arc<dyn CompletionBackend>>,
    request_timeout: Duration,
    fallback_model: String,
}

impl ModelRouter {
    pub fn new(
        backends: HashMap<ProviderKind, Arc<dyn CompletionBackend>>,
        settings: &ModelRouterSettings,
    ) -> Self {
        Self {
            registry: default_registry(),
            backends,
            request_timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
            fallback_model: settings.fallback_model.clone(),
        }
    }

    /// Production wiring: HTTP backends keyed off process-environment keys.
    pub fn with_default_backends(settings: &ModelRouterSettings) -> Self {
        let mut backends: HashMap<ProviderKind, Arc<dyn CompletionBackend>> = HashMap::new();
        backends.insert(ProviderKind::OpenAi, Arc::new(OpenAiBackend::from_env()));
        backends.insert(
            ProviderKind::Anthropic,
            Arc::new(AnthropicBackend::from_env()),
        );
        backends.insert(
            ProviderKind::Ollama,
            Arc::new(OllamaBackend::new(&settings.ollama_host)),
        );
        Self::new(backends, settings)
    }

    pub fn available_models(&self) -> &[ModelConfig] {
        &self.registry
    }

    pub fn find_model(&self, key: &str) -> Option<&ModelConfig> {
        self.registry.iter().find(|model| model.key == key)
    }

    fn backend_configured(&self, provider: ProviderKind) -> bool {
        self.backends
            .get(&provider)
            .map(|backend| backend.is_configured())
            .unwrap_or(false)
    }

    /// Priority list, not a cost-optimizing search; ties break by registry
    /// insertion order.
    pub fn route(&self, task: &TaskDescriptor) -> Result<&ModelConfig, ModelRouterError> {
        let candidates: Vec<&ModelConfig> = self
            .registry
            .iter()
            .filter(|model| {
                model.capabilities.contains(&task.task_type)
                    && model.max_tokens >= task.tokens
                    && self.backend_configured(model.provider)
            })
            .collect();

        if candidates.is_empty() {
            return Err(ModelRouterError::NoEligibleModel);
        }

        if task.complexity == TaskLevel::Low
            && task.prefer_local != Some(false)
            && let Some(local) = candidates.iter().find(|model| model.local).copied()
        {
            return Ok(local);
        }

        if task.complexity == TaskLevel::High || task.urgency == TaskLevel::High {
            return Ok(pick_preferred(&candidates, HIGH_TIER_MODEL));
        }

        Ok(pick_preferred(&candidates, DEFAULT_MODEL))
    }

    /// Normalized completion call. Local runtime failures fall back exactly
    /// once to the fixed cloud fallback model; nothing else is retried.
    pub async fn generate(
        &self,
        model: &ModelConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, ModelRouterError> {
        match self.call_backend(model, messages, options).await {
            Ok(completion) => Ok(completion),
            Err(err) if model.local => {
                tracing::warn!(
                    model = model.key.as_str(),
                    error = %err,
                    "local model call failed, falling back to cloud"
                );
                let fallback = self
                    .find_model(&self.fallback_model)
                    .ok_or(ModelRouterError::NoEligibleModel)?;
                self.call_backend(fallback, messages, options).await
            }
            Err(err) => Err(err),
        }
    }

    async fn call_backend(
        &self,
        model: &ModelConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, ModelRouterError> {
        let backend = self
            .backends
            .get(&model.provider)
            .ok_or_else(|| ModelRouterError::UnsupportedProvider(model.provider.to_string()))?;
        if !backend.is_configured() {
            return Err(ModelRouterError::ProviderNotConfigured(
                model.provider.to_string(),
            ));
        }

        tokio::time::timeout(self.request_timeout, backend.chat(model, messages, options))
            .await
            .map_err(|_| ModelRouterError::Timeout(self.request_timeout))?
    }
}

fn pick_preferred<'a>(candidates: &[&'a ModelConfig], preferred: &str) -> &'a ModelConfig {
    candidates
        .iter()
        .find(|model| model.key == preferred)
        .copied()
        .or_else(|| candidates.iter().find(|model| !model.local).copied())
        .unwrap_or(candidates[0])
}

fn default_registry() -> Vec<ModelConfig> {
    use TaskType::*;
    vec![
        ModelConfig {
            key: "claude-sonnet-4".to_string(),
            name: "claude-sonnet-4-20250514".to_string(),
            provider: ProviderKind::Anthropic,
            max_tokens: 200_000,
            cost_per_token: 0.000_03,
            capabilities: vec![Code, Analysis, Reasoning, Vision],
            local: false,
        },
        ModelConfig {
            key: "claude-3-7-sonnet".to_string(),
            name: "claude-3-7-sonnet-20250219".to_string(),
            provider: ProviderKind::Anthropic,
            max_tokens: 200_000,
            cost_per_token: 0.000_03,
            capabilities: vec![Code, Analysis, Reasoning, Vision],
            local: false,
        },
        ModelConfig {
            key: "gpt-4o".to_string(),
            name: "gpt-4o".to_string(),
            provider: ProviderKind::OpenAi,
            max_tokens: 128_000,
            cost_per_token: 0.000_03,
            capabilities: vec![Code, Analysis, Reasoning, Vision],
            local: false,
        },
        ModelConfig {
            key: "gpt-4o-mini".to_string(),
            name: "gpt-4o-mini".to_string(),
            provider: ProviderKind::OpenAi,
            max_tokens: 128_000,
            cost_per_token: 0.000_015,
            capabilities: vec![Code, Analysis, Reasoning],
            local: false,
        },
        ModelConfig {
            key: "codegemma".to_string(),
            name: "codegemma:7b".to_string(),
            provider: ProviderKind::Ollama,
            max_tokens: 8_192,
            cost_per_token: 0.0,
            capabilities: vec![Code, Completion],
            local: true,
        },
        ModelConfig {
            key: "qwen2.5-coder".to_string(),
            name: "qwen2.5-coder:7b".to_string(),
            provider: ProviderKind::Ollama,
            max_tokens: 32_768,
            cost_per_token: 0.0,
            capabilities: vec![Code, Analysis, Reasoning],
            local: true,
        },
        ModelConfig {
            key: "llama3.2".to_string(),
            name: "llama3.2:3b".to_string(),
            provider: ProviderKind::Ollama,
            max_tokens: 128_000,
            cost_per_token: 0.0,
            capabilities: vec![Reasoning, Analysis],
            local: true,
        },
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// Scripted backend: pops one canned reply (or error) per call.
    pub struct FakeBackend {
        replies: Mutex<Vec<Result<String, String>>>,
        pub calls: AtomicUsize,
        configured: bool,
    }

    impl FakeBackend {
        pub fn with_replies(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
                configured: true,
            }
        }

        pub fn unconfigured() -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                configured: false,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn chat(
            &self,
            _model: &ModelConfig,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<Completion, ModelRouterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    None
                } else {
                    Some(replies.remove(0))
                }
            };
            match next {
                Some(Ok(content)) => Ok(Completion {
                    content,
                    tokens: 10,
                    cost: 0.0,
                }),
                Some(Err(message)) => Err(ModelRouterError::Http(message)),
                None => Err(ModelRouterError::Http("no scripted reply".to_string())),
            }
        }
    }

    pub fn router_with(
        openai: Arc<FakeBackend>,
        anthropic: Arc<FakeBackend>,
        ollama: Arc<FakeBackend>,
    ) -> ModelRouter {
        let mut backends: HashMap<ProviderKind, Arc<dyn CompletionBackend>> = HashMap::new();
        backends.insert(ProviderKind::OpenAi, openai);
        backends.insert(ProviderKind::Anthropic, anthropic);
        backends.insert(ProviderKind::Ollama, ollama);
        ModelRouter::new(backends, &ModelRouterSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{test_support::*, *};

    fn task(task_type: TaskType, complexity: TaskLevel, tokens: u32) -> TaskDescriptor {
        TaskDescriptor {
            task_type,
            complexity,
            urgency: TaskLevel::Medium,
            tokens,
            prefer_local: None,
        }
    }

    #[test]
    fn low_complexity_code_prefers_a_local_model() {
        let router = router_with(
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::with_replies(vec![])),
        );

        let model = router
            .route(&task(TaskType::Code, TaskLevel::Low, 500))
            .unwrap();
        assert!(model.local);
        assert_eq!(model.key, "codegemma");
    }

    #[test]
    fn prefer_local_false_overrides_the_local_shortcut() {
        let router = router_with(
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::with_replies(vec![])),
        );

        let mut descriptor = task(TaskType::Code, TaskLevel::Low, 500);
        descriptor.prefer_local = Some(false);
        let model = router.route(&descriptor).unwrap();
        assert!(!model.local);
    }

    #[test]
    fn high_complexity_routes_to_the_top_cloud_model() {
        let router = router_with(
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::with_replies(vec![])),
        );

        let model = router
            .route(&task(TaskType::Code, TaskLevel::High, 4000))
            .unwrap();
        assert_eq!(model.key, "claude-sonnet-4");
    }

    #[test]
    fn unconfigured_providers_are_skipped() {
        let router = router_with(
            Arc::new(FakeBackend::with_replies(vec![])),
            Arc::new(FakeBackend::unconfigured()),
            Arc::new(FakeBackend::unconfigured()),
        );

        let model = router
            .route(&task(TaskType::Code, TaskLevel::High, 4000))
            .unwrap();
        assert_eq!(model.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn token_budget_filters_small_models() {
        let router = router_with(
            Arc::new(FakeBackend::unconfigured()),
            Arc::new(FakeBackend::unconfigured()),
            Arc::new(FakeBackend::with_replies(vec![])),
        );

        // codegemma (8k) is out; qwen2.5-coder (32k) is the first fit.
        let model = router
            .route(&task(TaskType::Code, TaskLevel::Low, 16_000))
            .unwrap();
        assert_eq!(model.key, "qwen2.5-coder");
    }

    #[tokio::test]
    async fn local_failure_falls_back_exactly_once_to_cloud() {
        let openai = Arc::new(FakeBackend::with_replies(vec![Ok("rescued".to_string())]));
        let ollama = Arc::new(FakeBackend::with_replies(vec![Err("connection refused"
            .to_string())]));
        let router = router_with(
            openai.clone(),
            Arc::new(FakeBackend::with_replies(vec![])),
            ollama.clone(),
        );

        let model = router.find_model("qwen2.5-coder").unwrap().clone();
        let completion = router
            .generate(&model, &[ChatMessage::user("hi")], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(completion.content, "rescued");
        assert_eq!(ollama.call_count(), 1);
        assert_eq!(openai.call_count(), 1);
    }

    #[tokio::test]
    async fn cloud_failure_does_not_retry() {
        let anthropic = Arc::new(FakeBackend::with_replies(vec![Err("boom".to_string())]));
        let openai = Arc::new(FakeBackend::with_replies(vec![Ok("unused".to_string())]));
        let router = router_with(
            openai.clone(),
            anthropic.clone(),
            Arc::new(FakeBackend::with_replies(vec![])),
        );

        let model = router.find_model("claude-sonnet-4").unwrap().clone();
        let err = router
            .generate(&model, &[ChatMessage::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ModelRouterError::Http(_)));
        assert_eq!(anthropic.call_count(), 1);
        assert_eq!(openai.call_count(), 0);
    }
}
