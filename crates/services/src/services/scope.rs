use db::models::{project::Project, session::Scope};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error(transparent)]
    Database(#[from] db::DbErr),
    #[error("Project not found")]
    ProjectNotFound,
}

/// Outcome of checking a proposed scope against project guard rails.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ScopeCheck {
    pub needs_permission: bool,
    pub reason: Option<String>,
    pub request: Option<String>,
}

impl ScopeCheck {
    fn accepted() -> Self {
        Self {
            needs_permission: false,
            reason: None,
            request: None,
        }
    }

    fn needs_permission(reason: String, request: String) -> Self {
        Self {
            needs_permission: true,
            reason: Some(reason),
            request: Some(request),
        }
    }
}

/// Rules run in a fixed order and the first violation wins; reasons are
/// never aggregated. Forbidden-path matching is substring containment, the
/// same contract the settings UI documents.
pub async fn validate_scope<C: ConnectionTrait>(
    db: &C,
    scope: &Scope,
    project_id: Uuid,
) -> Result<ScopeCheck, ScopeError> {
    let project = Project::find_by_id(db, project_id)
        .await?
        .ok_or(ScopeError::ProjectNotFound)?;
    let settings = project.settings;

    if let Some(max_files) = settings.max_files
        && scope.files.len() > max_files as usize
    {
        return Ok(ScopeCheck::needs_permission(
            format!(
                "Scope exceeds max files limit ({} > {})",
                scope.files.len(),
                max_files
            ),
            format!("Allow editing {} files?", scope.files.len()),
        ));
    }

    let forbidden_files: Vec<&String> = scope
        .files
        .iter()
        .filter(|file| settings.forbidden_globs.iter().any(|glob| file.contains(glob.as_str())))
        .collect();

    if !forbidden_files.is_empty() {
        let listing = forbidden_files
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Ok(ScopeCheck::needs_permission(
            format!("Attempting to modify forbidden files: {listing}"),
            "Allow modifying these restricted files?".to_string(),
        ));
    }

    Ok(ScopeCheck::accepted())
}
