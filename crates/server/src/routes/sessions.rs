use axum::{
    Extension, Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::session::{CreateSession, Session, SessionStatus};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::memory::ColdMemory;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::load_session_middleware};

#[derive(Debug, Deserialize, TS)]
pub struct ApproveRequest {
    pub allow: bool,
    #[serde(default, alias = "addFiles")]
    pub add_files: Vec<String>,
    #[serde(default, alias = "addSymbols")]
    pub add_symbols: Vec<String>,
}

#[derive(Debug, Deserialize, TS)]
pub struct ApplyRequest {
    #[serde(default)]
    pub hunks: Option<Vec<String>>,
}

#[derive(Debug, Serialize, TS)]
pub struct AckResponse {
    pub success: bool,
}

/// Returns immediately with the session in `active` status carrying only
/// the user's message; orchestration continues in the background and
/// reaches the client over the event stream.
pub async fn create_session(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateSession>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    if payload.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt is required".to_string()));
    }

    let session = Session::create(&deployment.db().pool, &payload, Uuid::new_v4()).await?;

    let background = deployment.clone();
    let spawned = session.clone();
    tokio::spawn(async move {
        if let Err(err) = background
            .agent()
            .process_session(&background.db().pool, &spawned)
            .await
        {
            tracing::warn!(session_id = %spawned.id, error = %err, "session processing failed");
        }
    });

    Ok(ResponseJson(ApiResponse::success(session)))
}

pub async fn get_session(
    Extension(session): Extension<Session>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(session)))
}

/// Resolves a `pending_approval` session: denial fails it, approval
/// expands the scope with the newly authorized files/symbols and resumes
/// patch proposal in the background.
pub async fn approve_session(
    Extension(session): Extension<Session>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<ApproveRequest>,
) -> Result<ResponseJson<ApiResponse<AckResponse>>, ApiError> {
    if session.status != SessionStatus::PendingApproval {
        return Err(ApiError::Conflict(
            "Session is not awaiting approval".to_string(),
        ));
    }

    if !payload.allow {
        Session::transition(&deployment.db().pool, session.id, SessionStatus::Failed).await?;
        return Ok(ResponseJson(ApiResponse::success(AckResponse {
            success: true,
        })));
    }

    let scope = session
        .scope
        .as_ref()
        .ok_or_else(|| ApiError::Conflict("Session has no scope to expand".to_string()))?;
    let updated_scope = scope.expanded_with(&payload.add_files, &payload.add_symbols);

    let background = deployment.clone();
    let session_id = session.id;
    tokio::spawn(async move {
        if let Err(err) = background
            .agent()
            .continue_session(&background.db().pool, session_id, &updated_scope)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "session resume failed");
        }
    });

    Ok(ResponseJson(ApiResponse::success(AckResponse {
        success: true,
    })))
}

/// Approves hunks (all when none are named) and writes approved content
/// into the project file store. Stale hunks surface as a 409.
pub async fn apply_session(
    Extension(session): Extension<Session>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<ApplyRequest>,
) -> Result<ResponseJson<ApiResponse<AckResponse>>, ApiError> {
    let selected = payload.hunks.unwrap_or_default();
    deployment
        .agent()
        .apply_hunks(&deployment.db().pool, session.id, &selected)
        .await?;
    Ok(ResponseJson(ApiResponse::success(AckResponse {
        success: true,
    })))
}

pub async fn revert_session(
    Extension(session): Extension<Session>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<AckResponse>>, ApiError> {
    deployment
        .agent()
        .revert_session(&deployment.db().pool, session.id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(AckResponse {
        success: true,
    })))
}

/// Cold-tier memory: the full session record plus its file changes, loaded
/// only on explicit request.
pub async fn get_cold_memory(
    Extension(session): Extension<Session>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<ColdMemory>>, ApiError> {
    let cold = deployment
        .memory()
        .cold(&deployment.db().pool, session.id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(cold)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let session_id_router = Router::new()
        .route("/", get(get_session))
        .route("/approve", post(approve_session))
        .route("/apply", post(apply_session))
        .route("/revert", post(revert_session))
        .route("/memory", get(get_cold_memory))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_session_middleware::<DeploymentImpl>,
        ));

    let sessions_router = Router::new()
        .route("/", post(create_session))
        .nest("/{id}", session_id_router);

    Router::new().nest("/sessions", sessions_router)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use db::models::project::{CreateProject, Project};

    use super::*;
    use crate::test_support::TestEnvGuard;

    #[tokio::test]
    async fn create_session_requires_a_prompt_and_existing_project() {
        let temp_root = std::env::temp_dir().join(format!("reme-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp_root).unwrap();
        let _env_guard = TestEnvGuard::new(&temp_root);

        let deployment = DeploymentImpl::new().await.unwrap();

        let blank = create_session(
            State(deployment.clone()),
            Json(CreateSession {
                project_id: Uuid::new_v4(),
                prompt: "  ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(blank.into_response().status(), StatusCode::BAD_REQUEST);

        let missing_project = create_session(
            State(deployment.clone()),
            Json(CreateSession {
                project_id: Uuid::new_v4(),
                prompt: "do something".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(
            missing_project.into_response().status(),
            StatusCode::NOT_FOUND
        );

        let project_id = Uuid::new_v4();
        Project::create(
            &deployment.db().pool,
            &CreateProject {
                name: "p".to_string(),
                repo_url: None,
                default_branch: None,
                settings: None,
            },
            project_id,
        )
        .await
        .unwrap();

        let created = create_session(
            State(deployment),
            Json(CreateSession {
                project_id,
                prompt: "do something".to_string(),
            }),
        )
        .await
        .unwrap();
        let session = created.0.data.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn approve_rejects_sessions_that_are_not_parked() {
        let temp_root = std::env::temp_dir().join(format!("reme-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp_root).unwrap();
        let _env_guard = TestEnvGuard::new(&temp_root);

        let deployment = DeploymentImpl::new().await.unwrap();

        let project_id = Uuid::new_v4();
        Project::create(
            &deployment.db().pool,
            &CreateProject {
                name: "p".to_string(),
                repo_url: None,
                default_branch: None,
                settings: None,
            },
            project_id,
        )
        .await
        .unwrap();
        let session = Session::create(
            &deployment.db().pool,
            &CreateSession {
                project_id,
                prompt: "x".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let err = approve_session(
            Extension(session),
            State(deployment),
            Json(ApproveRequest {
                allow: true,
                add_files: vec![],
                add_symbols: vec![],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
