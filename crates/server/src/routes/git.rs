use axum::{
    Extension, Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::{
    events::{EVENT_GIT_UPDATED, GitEventPayload},
    models::{
        event_outbox::EventOutbox,
        git_state::{GitState, GitStateUpdate},
        project::Project,
    },
};
use deployment::Deployment;
use serde::Deserialize;
use services::services::git::{
    BranchAction, BranchOutcome, CommitOutcome, GitService, PullOutcome, PushOutcome, RepoStatus,
};
use ts_rs::TS;
use utils::{assets::project_workdir, response::ApiResponse};
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::load_project_middleware};

#[derive(Debug, Deserialize, TS)]
pub struct CommitRequest {
    pub message: String,
    /// "approved_hunks" (default) or "all". Both currently stage the whole
    /// working tree; partial staging is a documented simplification.
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize, TS)]
pub struct BranchRequest {
    pub action: BranchAction,
    pub name: String,
}

async fn run_git<T, F>(git: GitService, task: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(GitService) -> Result<T, services::services::git::GitServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || task(git))
        .await
        .map_err(|err| ApiError::Internal(format!("git task join error: {err}")))?
        .map_err(ApiError::from)
}

async fn refresh_git_state(
    deployment: &DeploymentImpl,
    project_id: Uuid,
    status: &RepoStatus,
) -> Result<GitState, ApiError> {
    let state = GitState::upsert(
        &deployment.db().pool,
        project_id,
        GitStateUpdate {
            branch: Some(status.branch.clone()),
            ahead: Some(status.ahead),
            behind: Some(status.behind),
            last_commit: status.last_commit.clone(),
        },
    )
    .await?;
    Ok(state)
}

async fn broadcast_git_update(
    deployment: &DeploymentImpl,
    project_id: Uuid,
    result: serde_json::Value,
) -> Result<(), ApiError> {
    let payload = serde_json::to_value(GitEventPayload { project_id, result })
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    EventOutbox::enqueue(
        &deployment.db().pool,
        EVENT_GIT_UPDATED,
        "project",
        project_id,
        payload,
    )
    .await?;
    Ok(())
}

/// Polled continuously by the UI; lazily initializes missing repositories
/// and never propagates repository errors.
pub async fn get_status(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<RepoStatus>>, ApiError> {
    let git = deployment.git().clone();
    let workdir = project_workdir(project.id);
    let status = tokio::task::spawn_blocking(move || git.status_or_init(&workdir))
        .await
        .map_err(|err| ApiError::Internal(format!("git task join error: {err}")))?;

    refresh_git_state(&deployment, project.id, &status).await?;
    Ok(ResponseJson(ApiResponse::success(status)))
}

pub async fn commit(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CommitRequest>,
) -> Result<ResponseJson<ApiResponse<CommitOutcome>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Commit message is required".to_string(),
        ));
    }

    let workdir = project_workdir(project.id);
    let stage_all = payload.stage.as_deref() != Some("approved_hunks");
    let message = payload.message.clone();
    let outcome = run_git(deployment.git().clone(), move |git| {
        git.commit(&workdir, &message, stage_all)
    })
    .await?;

    let workdir = project_workdir(project.id);
    let status = run_git(deployment.git().clone(), move |git| git.status(&workdir)).await?;
    refresh_git_state(&deployment, project.id, &status).await?;
    broadcast_git_update(
        &deployment,
        project.id,
        serde_json::to_value(&outcome).map_err(|err| ApiError::Internal(err.to_string()))?,
    )
    .await?;

    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn pull(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<PullOutcome>>, ApiError> {
    let workdir = project_workdir(project.id);
    let outcome = run_git(deployment.git().clone(), move |git| git.pull(&workdir)).await?;

    let workdir = project_workdir(project.id);
    let status = run_git(deployment.git().clone(), move |git| git.status(&workdir)).await?;
    refresh_git_state(&deployment, project.id, &status).await?;
    broadcast_git_update(
        &deployment,
        project.id,
        serde_json::to_value(&outcome).map_err(|err| ApiError::Internal(err.to_string()))?,
    )
    .await?;

    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn push(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<PushOutcome>>, ApiError> {
    let workdir = project_workdir(project.id);
    let outcome = run_git(deployment.git().clone(), move |git| git.push(&workdir)).await?;

    let workdir = project_workdir(project.id);
    let status = run_git(deployment.git().clone(), move |git| git.status(&workdir)).await?;
    refresh_git_state(&deployment, project.id, &status).await?;
    broadcast_git_update(
        &deployment,
        project.id,
        serde_json::to_value(&outcome).map_err(|err| ApiError::Internal(err.to_string()))?,
    )
    .await?;

    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn manage_branch(
    Extension(project): Extension<Project>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<BranchRequest>,
) -> Result<ResponseJson<ApiResponse<BranchOutcome>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Branch name is required".to_string()));
    }

    let workdir = project_workdir(project.id);
    let action = payload.action;
    let name = payload.name.clone();
    let outcome = run_git(deployment.git().clone(), move |git| {
        git.manage_branch(&workdir, action, &name)
    })
    .await?;

    let workdir = project_workdir(project.id);
    let status = run_git(deployment.git().clone(), move |git| git.status(&workdir)).await?;
    refresh_git_state(&deployment, project.id, &status).await?;
    broadcast_git_update(
        &deployment,
        project.id,
        serde_json::to_value(&outcome).map_err(|err| ApiError::Internal(err.to_string()))?,
    )
    .await?;

    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let project_git_router = Router::new()
        .route("/status", get(get_status))
        .route("/commit", post(commit))
        .route("/pull", post(pull))
        .route("/push", post(push))
        .route("/branch", post(manage_branch))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_project_middleware::<DeploymentImpl>,
        ));

    Router::new().nest("/git/{project_id}", project_git_router)
}
