use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatMessage, Completion, CompletionBackend, CompletionOptions, ModelConfig,
    ModelRouterError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4000;

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicBackend {
    pub fn from_env() -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY not provided, Anthropic models will be unavailable");
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
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
            .ok_or_else(|| ModelRouterError::ProviderNotConfigured("anthropic".to_string()))?;

        // The messages API takes the system prompt out-of-band.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != "system").collect();

        let max_tokens = options
            .max_tokens
            .unwrap_or(DEFAULT_MAX_TOKENS)
            .min(model.max_tokens);
        let mut body = json!({
            "model": model.name,
            "messages": turns,
            "max_tokens": max_tokens,
            "temperature": options.temperature.unwrap_or(0.7),
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| ModelRouterError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelRouterError::Http(format!(
                "anthropic returned {status}: {detail}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| ModelRouterError::Parse(err.to_string()))?;
        let content = parsed
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .and_then(|block| block.text.clone())
            .unwrap_or_default();
        let tokens = parsed
            .usage
            .map(|usage| usage.input_tokens + usage.output_tokens)
            .unwrap_or(0);

        Ok(Completion {
            content,
            tokens,
            cost: f64::from(tokens) * model.cost_per_token,
        })
    }
}
