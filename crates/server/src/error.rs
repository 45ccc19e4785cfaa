use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::{
    DbErr,
    models::{
        file_change::FileChangeError, git_state::GitStateError, memory_note::MemoryNoteError,
        project::ProjectError, project_file::ProjectFileError, session::SessionError,
        template::TemplateError,
    },
};
use deployment::DeploymentError;
use services::services::{
    agent::AgentError, git::GitServiceError, memory::MemoryError, model_router::ModelRouterError,
    scope::ScopeError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    FileChange(#[from] FileChangeError),
    #[error(transparent)]
    MemoryNote(#[from] MemoryNoteError),
    #[error(transparent)]
    ProjectFile(#[from] ProjectFileError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    GitState(#[from] GitStateError),
    #[error(transparent)]
    GitService(#[from] GitServiceError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    ModelRouter(#[from] ModelRouterError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Project(err) => match err {
                ProjectError::NotFound => (StatusCode::NOT_FOUND, "ProjectError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ProjectError"),
            },
            ApiError::Session(err) => match err {
                SessionError::NotFound | SessionError::ProjectNotFound => {
                    (StatusCode::NOT_FOUND, "SessionError")
                }
                SessionError::InvalidTransition { .. } => (StatusCode::CONFLICT, "SessionError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "SessionError"),
            },
            ApiError::FileChange(err) => match err {
                FileChangeError::NotFound | FileChangeError::SessionNotFound => {
                    (StatusCode::NOT_FOUND, "FileChangeError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "FileChangeError"),
            },
            ApiError::MemoryNote(err) => match err {
                MemoryNoteError::ProjectNotFound => (StatusCode::NOT_FOUND, "MemoryNoteError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "MemoryNoteError"),
            },
            ApiError::ProjectFile(err) => match err {
                ProjectFileError::ProjectNotFound => (StatusCode::NOT_FOUND, "ProjectFileError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ProjectFileError"),
            },
            ApiError::Template(err) => match err {
                TemplateError::NotFound => (StatusCode::NOT_FOUND, "TemplateError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "TemplateError"),
            },
            ApiError::GitState(err) => match err {
                GitStateError::ProjectNotFound => (StatusCode::NOT_FOUND, "GitStateError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "GitStateError"),
            },
            // Conflict-shaped git failures surface as conflicts, the rest
            // as user-correctable bad requests.
            ApiError::GitService(err) => match err {
                GitServiceError::MergeConflicts(_) => (StatusCode::CONFLICT, "GitServiceError"),
                GitServiceError::BranchNotFound(_) => (StatusCode::NOT_FOUND, "GitServiceError"),
                GitServiceError::NoRemote => (StatusCode::BAD_REQUEST, "GitServiceError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "GitServiceError"),
            },
            ApiError::Agent(err) => match err {
                AgentError::HunkApplyConflict { .. } => (StatusCode::CONFLICT, "AgentError"),
                AgentError::ProjectNotFound => (StatusCode::NOT_FOUND, "AgentError"),
                AgentError::Session(SessionError::NotFound) => {
                    (StatusCode::NOT_FOUND, "AgentError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "AgentError"),
            },
            ApiError::Memory(err) => match err {
                MemoryError::SessionNotFound => (StatusCode::NOT_FOUND, "MemoryError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "MemoryError"),
            },
            ApiError::ModelRouter(err) => match err {
                ModelRouterError::NoEligibleModel
                | ModelRouterError::ProviderNotConfigured(_) => {
                    (StatusCode::BAD_REQUEST, "ModelRouterError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ModelRouterError"),
            },
            ApiError::Scope(err) => match err {
                ScopeError::ProjectNotFound => (StatusCode::NOT_FOUND, "ScopeError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ScopeError"),
            },
            ApiError::Deployment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentError"),
            ApiError::Database(db_err) => match db_err {
                DbErr::RecordNotFound(_) => (StatusCode::NOT_FOUND, "DatabaseError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            },
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::GitService(GitServiceError::MergeConflicts(msg)) => msg.clone(),
            ApiError::Agent(AgentError::HunkApplyConflict { path, .. }) => format!(
                "The proposed changes no longer apply to {path}; ask the agent to re-propose"
            ),
            _ => format!("{}: {}", error_type, self),
        };

        if status_code.is_server_error() {
            tracing::error!(
                status = %status_code,
                error_type,
                error = %self,
                "API request failed"
            );
        }
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use db::models::session::SessionStatus;
    use services::services::patch::PatchApplyError;

    use super::*;

    #[test]
    fn api_error_maps_to_expected_http_statuses() {
        assert_eq!(
            ApiError::BadRequest("bad".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("missing".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("conflict".to_string())
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal("boom".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn domain_errors_map_to_expected_http_statuses() {
        assert_eq!(
            ApiError::from(ProjectError::NotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SessionError::NotFound)
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SessionError::InvalidTransition {
                from: SessionStatus::Completed,
                to: SessionStatus::Active,
            })
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(GitServiceError::MergeConflicts("diverged".to_string()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AgentError::HunkApplyConflict {
                path: "a.ts".to_string(),
                source: PatchApplyError::OutOfBounds {
                    hunk_id: "h".to_string()
                },
            })
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
    }
}
