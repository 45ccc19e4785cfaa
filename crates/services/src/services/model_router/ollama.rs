use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatMessage, Completion, CompletionBackend, CompletionOptions, ModelConfig,
    ModelRouterError};

const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Local runtime. Availability is discovered per call; a dead daemon just
/// means the router's cloud fallback kicks in.
pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
}

impl OllamaBackend {
    pub fn new(host: &str) -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| host.to_string());
        Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
        }
    }

    /// Names of models the local daemon has pulled; empty when unreachable.
    pub async fn list_models(&self) -> Vec<String> {
        #[derive(Deserialize)]
        struct Listing {
            models: Vec<ListedModel>,
        }
        #[derive(Deserialize)]
        struct ListedModel {
            name: String,
        }

        let response = match self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("Failed to list Ollama models: {}", err);
                return Vec::new();
            }
        };

        match response.json::<Listing>().await {
            Ok(listing) => listing.models.into_iter().map(|m| m.name).collect(),
            Err(err) => {
                tracing::warn!("Failed to parse Ollama model listing: {}", err);
                Vec::new()
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        model: &ModelConfig,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, ModelRouterError> {
        let num_predict = options
            .max_tokens
            .unwrap_or(DEFAULT_MAX_TOKENS)
            .min(model.max_tokens);
        let body = json!({
            "model": model.name,
            "messages": messages,
            "stream": false,
            "options": {
                "num_predict": num_predict,
                "temperature": options.temperature.unwrap_or(0.7),
            },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|err| ModelRouterError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelRouterError::Http(format!(
                "ollama returned {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ModelRouterError::Parse(err.to_string()))?;

        // Token counts are not reported by the local runtime; cost is
        // definitionally free.
        Ok(Completion {
            content: parsed.message.content,
            tokens: 0,
            cost: 0.0,
        })
    }
}
