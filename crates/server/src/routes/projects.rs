use axum::{
    Extension, Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::{
    project::{CreateProject, Project, UpdateProject},
    session::Session,
};
use deployment::Deployment;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::load_project_middleware};

pub async fn get_projects(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = Project::find_all(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

pub async fn get_project(
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn create_project(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }

    tracing::debug!("Creating project '{}'", payload.name);
    let project = Project::create(&deployment.db().pool, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn update_project_settings(
    Extension(existing): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let project = Project::update(&deployment.db().pool, existing.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn get_project_sessions(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Session>>>, ApiError> {
    let sessions = Session::find_by_project_id(&deployment.db().pool, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(sessions)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let project_id_router = Router::new()
        .route("/", get(get_project))
        .route("/settings", put(update_project_settings))
        .route("/sessions", get(get_project_sessions))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_project_middleware::<DeploymentImpl>,
        ));

    let projects_router = Router::new()
        .route("/", get(get_projects).post(create_project))
        .nest("/{id}", project_id_router);

    Router::new().nest("/projects", projects_router)
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use deployment::Deployment;
    use uuid::Uuid;

    use super::*;
    use crate::test_support::TestEnvGuard;

    #[tokio::test]
    async fn create_project_rejects_blank_names() {
        let temp_root = std::env::temp_dir().join(format!("reme-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp_root).unwrap();
        let _env_guard = TestEnvGuard::new(&temp_root);

        let deployment = DeploymentImpl::new().await.unwrap();

        let payload = CreateProject {
            name: "   ".to_string(),
            repo_url: None,
            default_branch: None,
            settings: None,
        };
        let err = create_project(State(deployment), Json(payload))
            .await
            .unwrap_err();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.get("success").and_then(|v| v.as_bool()), Some(false));
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let temp_root = std::env::temp_dir().join(format!("reme-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp_root).unwrap();
        let _env_guard = TestEnvGuard::new(&temp_root);

        let deployment = DeploymentImpl::new().await.unwrap();

        let payload = CreateProject {
            name: "demo".to_string(),
            repo_url: None,
            default_branch: Some("trunk".to_string()),
            settings: None,
        };
        create_project(State(deployment.clone()), Json(payload))
            .await
            .unwrap();

        let listed = get_projects(State(deployment)).await.unwrap();
        let projects = listed.0.data.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "demo");
        assert_eq!(projects[0].default_branch, "trunk");
    }
}
