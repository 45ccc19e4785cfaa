use axum::{
    Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::model_router::{
    ChatMessage, CompletionOptions, ModelConfig, OllamaBackend, TaskDescriptor,
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub task: TaskDescriptor,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: CompletionOptions,
}

#[derive(Debug, Serialize, TS)]
pub struct RouteResponse {
    pub content: String,
    pub tokens: u32,
    pub cost: f64,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Serialize, TS)]
pub struct ModelListResponse {
    pub available: Vec<ModelConfig>,
    pub local: Vec<String>,
}

/// One-shot routed completion: picks a model for the task descriptor and
/// returns the normalized result.
pub async fn route_completion(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<RouteRequest>,
) -> Result<ResponseJson<ApiResponse<RouteResponse>>, ApiError> {
    if payload.messages.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one message is required".to_string(),
        ));
    }

    let router = deployment.model_router();
    let model = router.route(&payload.task)?.clone();
    let completion = router
        .generate(&model, &payload.messages, &payload.options)
        .await?;

    Ok(ResponseJson(ApiResponse::success(RouteResponse {
        content: completion.content,
        tokens: completion.tokens,
        cost: completion.cost,
        model: model.name.clone(),
        provider: model.provider.to_string(),
    })))
}

pub async fn get_models(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<ModelListResponse>>, ApiError> {
    let available = deployment.model_router().available_models().to_vec();

    let ollama_host = deployment.config().read().await.model.ollama_host.clone();
    let local = OllamaBackend::new(&ollama_host).list_models().await;

    Ok(ResponseJson(ApiResponse::success(ModelListResponse {
        available,
        local,
    })))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/ai/route", post(route_completion))
        .route("/ai/models", get(get_models))
}
