use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatMessage, Completion, CompletionBackend, CompletionOptions, ModelConfig,
    ModelRouterError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 4000;

pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiBackend {
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not provided, OpenAI models will be unavailable");
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(
        &self,
        model: &ModelConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, ModelRouterError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ModelRouterError::ProviderNotConfigured("openai".to_string()))?;

        let max_tokens = options
            .max_tokens
            .unwrap_or(DEFAULT_MAX_TOKENS)
            .min(model.max_tokens);
        let body = json!({
            "model": model.name,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": options.temperature.unwrap_or(0.7),
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ModelRouterError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelRouterError::Http(format!(
                "openai returned {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ModelRouterError::Parse(err.to_string()))?;
        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let tokens = parsed.usage.map(|usage| usage.total_tokens).unwrap_or(0);

        Ok(Completion {
            content,
            tokens,
            cost: f64::from(tokens) * model.cost_per_token,
        })
    }
}
