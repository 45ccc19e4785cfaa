use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    project::{CreateProject, Project, ProjectSettings},
    project_file::ProjectFile,
    template::{Template, TemplateError},
};
use deployment::Deployment;
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TemplateListQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn get_templates(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<TemplateListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Template>>>, ApiError> {
    let templates = Template::find_all(
        &deployment.db().pool,
        query.category.as_deref(),
        query.search.as_deref(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(templates)))
}

pub async fn get_template(
    State(deployment): State<DeploymentImpl>,
    Path(template_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Template>>, ApiError> {
    let template = Template::find_by_id(&deployment.db().pool, template_id)
        .await?
        .ok_or(TemplateError::NotFound)?;
    Ok(ResponseJson(ApiResponse::success(template)))
}

fn template_project_settings() -> ProjectSettings {
    ProjectSettings {
        strict_mode: false,
        max_lines: Some(1000),
        max_files: Some(50),
        forbidden_globs: vec!["node_modules/".to_string(), ".git/".to_string()],
        style_freeze: false,
    }
}

/// Clones the template's files into a fresh project's file store and bumps
/// the download counter.
pub async fn create_project_from_template(
    State(deployment): State<DeploymentImpl>,
    Path(template_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let template = Template::find_by_id(&deployment.db().pool, template_id)
        .await?
        .ok_or(TemplateError::NotFound)?;

    let project = Project::create(
        &deployment.db().pool,
        &CreateProject {
            name: format!("{} Project", template.name),
            repo_url: None,
            default_branch: Some("main".to_string()),
            settings: Some(template_project_settings()),
        },
        Uuid::new_v4(),
    )
    .await?;

    for file in &template.files {
        ProjectFile::save(&deployment.db().pool, project.id, &file.path, &file.content).await?;
    }

    Template::increment_downloads(&deployment.db().pool, template_id).await?;

    Ok(ResponseJson(ApiResponse::success(project)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let templates_router = Router::new()
        .route("/", get(get_templates))
        .route("/{id}", get(get_template))
        .route("/{id}/create-project", post(create_project_from_template));

    Router::new().nest("/templates", templates_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEnvGuard;

    #[tokio::test]
    async fn create_project_from_template_copies_files() {
        let temp_root = std::env::temp_dir().join(format!("reme-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&temp_root).unwrap();
        let _env_guard = TestEnvGuard::new(&temp_root);

        let deployment = DeploymentImpl::new().await.unwrap();

        let templates = Template::find_all(&deployment.db().pool, None, None)
            .await
            .unwrap();
        assert!(!templates.is_empty(), "starter templates are seeded");
        let template = &templates[0];

        let response =
            create_project_from_template(State(deployment.clone()), Path(template.id))
                .await
                .unwrap();
        let project = response.0.data.unwrap();
        assert!(project.name.contains(&template.name));
        assert!(!project.settings.strict_mode);

        let files = ProjectFile::list(&deployment.db().pool, project.id)
            .await
            .unwrap();
        assert_eq!(files.len(), template.files.len());

        let reloaded = Template::find_by_id(&deployment.db().pool, template.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.downloads, template.downloads + 1);
    }
}
