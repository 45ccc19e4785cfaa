use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::project_file::{ProjectFile, ProjectFileMeta};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::index::FileNode;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Serialize, TS)]
pub struct FileTreeResponse {
    pub tree: Vec<FileNode>,
    pub files: Vec<ProjectFileMeta>,
}

#[derive(Debug, Serialize, TS)]
pub struct FileContentResponse {
    pub content: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct SaveFileRequest {
    pub content: String,
}

#[derive(Debug, Serialize, TS)]
pub struct AckResponse {
    pub success: bool,
}

pub async fn get_file_tree(
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<FileTreeResponse>>, ApiError> {
    let tree = deployment
        .index()
        .file_tree(&deployment.db().pool, project_id)
        .await?;
    let files = ProjectFile::list(&deployment.db().pool, project_id).await?;
    Ok(ResponseJson(ApiResponse::success(FileTreeResponse {
        tree,
        files,
    })))
}

pub async fn get_file(
    State(deployment): State<DeploymentImpl>,
    Path((project_id, path)): Path<(Uuid, String)>,
) -> Result<ResponseJson<ApiResponse<FileContentResponse>>, ApiError> {
    let content = ProjectFile::get(&deployment.db().pool, project_id, &path)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {path}")))?;
    Ok(ResponseJson(ApiResponse::success(FileContentResponse {
        content,
    })))
}

pub async fn save_file(
    State(deployment): State<DeploymentImpl>,
    Path((project_id, path)): Path<(Uuid, String)>,
    Json(payload): Json<SaveFileRequest>,
) -> Result<ResponseJson<ApiResponse<AckResponse>>, ApiError> {
    if path.trim().is_empty() {
        return Err(ApiError::BadRequest("File path is required".to_string()));
    }

    ProjectFile::save(&deployment.db().pool, project_id, &path, &payload.content).await?;
    Ok(ResponseJson(ApiResponse::success(AckResponse {
        success: true,
    })))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/files/{project_id}", get(get_file_tree))
        .route("/files/{project_id}/{*path}", get(get_file).put(save_file))
}

#[cfg(test)]
mod tests {
    use db::models::project::{CreateProject, Project};

    use super::*;
    use crate::test_support::TestEnvGuard;

    #[tokio::test]
    async fn save_then_get_round_trips_nested_paths() {
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

        save_file(
            State(deployment.clone()),
            Path((project_id, "src/app.ts".to_string())),
            Json(SaveFileRequest {
                content: "let x = 1;".to_string(),
            }),
        )
        .await
        .unwrap();

        let fetched = get_file(
            State(deployment.clone()),
            Path((project_id, "src/app.ts".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(fetched.0.data.unwrap().content, "let x = 1;");

        let tree = get_file_tree(State(deployment), Path(project_id))
            .await
            .unwrap();
        let payload = tree.0.data.unwrap();
        assert_eq!(payload.files.len(), 1);
        assert_eq!(payload.tree[0].name, "src");
    }

    #[tokio::test]
    async fn missing_file_is_a_404() {
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

        let err = get_file(
            State(deployment),
            Path((project_id, "nope.txt".to_string())),
        )
        .await
        .unwrap_err();
        use axum::response::IntoResponse;
        assert_eq!(
            err.into_response().status(),
            axum::http::StatusCode::NOT_FOUND
        );
    }
}
