use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    memory_note::{CreateMemoryNote, MemoryNote},
    project::Project,
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::memory::{MemoryStats, SearchOptions};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::load_project_middleware};

#[derive(Debug, Deserialize)]
pub struct MemorySearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Serialize, TS)]
pub struct MemorySearchResponse {
    pub notes: Vec<MemoryNote>,
    pub total: usize,
}

pub async fn search_memory(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<MemorySearchQuery>,
) -> Result<ResponseJson<ApiResponse<MemorySearchResponse>>, ApiError> {
    let notes = deployment
        .memory()
        .search(
            &deployment.db().pool,
            project.id,
            &query.q,
            SearchOptions {
                include_hot: true,
                include_warm: true,
                max_results: query.max_results.unwrap_or(10),
            },
        )
        .await?;

    let total = notes.len();
    Ok(ResponseJson(ApiResponse::success(MemorySearchResponse {
        notes,
        total,
    })))
}

pub async fn create_note(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateMemoryNote>,
) -> Result<ResponseJson<ApiResponse<MemoryNote>>, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Note content is required".to_string()));
    }

    let note = MemoryNote::create(&deployment.db().pool, project.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(note)))
}

pub async fn memory_stats(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<MemoryStats>>, ApiError> {
    let stats = deployment
        .memory()
        .stats(&deployment.db().pool, project.id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(stats)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let project_memory_router = Router::new()
        .route("/", post(create_note))
        .route("/search", get(search_memory))
        .route("/stats", get(memory_stats))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_project_middleware::<DeploymentImpl>,
        ));

    Router::new().nest("/memory/{project_id}", project_memory_router)
}
