use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entities::project,
    events::{EVENT_PROJECT_CREATED, EVENT_PROJECT_UPDATED, ProjectEventPayload},
    models::event_outbox::EventOutbox,
};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    NotFound,
}

/// Strict-mode guard rails for agent sessions against this project.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct ProjectSettings {
    pub strict_mode: bool,
    pub max_lines: Option<u32>,
    pub max_files: Option<u32>,
    pub forbidden_globs: Vec<String>,
    pub style_freeze: bool,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            strict_mode: true,
            max_lines: None,
            max_files: None,
            forbidden_globs: Vec::new(),
            style_freeze: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repo_url: Option<String>,
    pub default_branch: String,
    pub settings: ProjectSettings,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateProject {
    pub name: String,
    pub repo_url: Option<String>,
    pub default_branch: Option<String>,
    pub settings: Option<ProjectSettings>,
}

#[derive(Debug, Deserialize, TS)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub repo_url: Option<String>,
    pub settings: Option<ProjectSettings>,
}

impl Project {
    fn from_model(model: project::Model) -> Self {
        // Settings rows written by older builds may miss fields; fall back
        // field-by-field via serde defaults.
        let settings = serde_json::from_value(model.settings).unwrap_or_default();
        Self {
            id: model.uuid,
            name: model.name,
            repo_url: model.repo_url,
            default_branch: model.default_branch,
            settings,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub async fn count<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
        project::Entity::find().count(db).await
    }

    pub async fn find_all<C: ConnectionTrait>(db: &C) -> Result<Vec<Self>, DbErr> {
        let records = project::Entity::find()
            .order_by_desc(project::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = project::Entity::find()
            .filter(project::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateProject,
        project_id: Uuid,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let settings = data.settings.clone().unwrap_or_default();
        let active = project::ActiveModel {
            uuid: Set(project_id),
            name: Set(data.name.clone()),
            repo_url: Set(data.repo_url.clone()),
            default_branch: Set(data
                .default_branch
                .clone()
                .unwrap_or_else(|| "main".to_string())),
            settings: Set(serde_json::to_value(settings)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(ProjectEventPayload { project_id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_PROJECT_CREATED, "project", project_id, payload).await?;
        Ok(Self::from_model(model))
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        payload: &UpdateProject,
    ) -> Result<Self, ProjectError> {
        let record = project::Entity::find()
            .filter(project::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(ProjectError::NotFound)?;

        let mut active: project::ActiveModel = record.into();
        if let Some(name) = payload.name.clone() {
            active.name = Set(name);
        }
        if payload.repo_url.is_some() {
            active.repo_url = Set(payload.repo_url.clone());
        }
        if let Some(settings) = &payload.settings {
            active.settings = Set(serde_json::to_value(settings)
                .map_err(|err| DbErr::Custom(err.to_string()))?);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await?;
        let event = serde_json::to_value(ProjectEventPayload { project_id: id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_PROJECT_UPDATED, "project", id, event).await?;
        Ok(Self::from_model(updated))
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn create_and_find_round_trips_settings() {
        let db = setup_db().await;
        let id = Uuid::new_v4();

        Project::create(
            &db,
            &CreateProject {
                name: "demo".to_string(),
                repo_url: None,
                default_branch: None,
                settings: Some(ProjectSettings {
                    max_files: Some(2),
                    forbidden_globs: vec!["secrets/".to_string()],
                    ..Default::default()
                }),
            },
            id,
        )
        .await
        .unwrap();

        let found = Project::find_by_id(&db, id).await.unwrap().unwrap();
        assert_eq!(found.name, "demo");
        assert_eq!(found.default_branch, "main");
        assert_eq!(found.settings.max_files, Some(2));
        assert_eq!(found.settings.forbidden_globs, vec!["secrets/".to_string()]);
    }

    #[tokio::test]
    async fn update_replaces_settings_and_keeps_name() {
        let db = setup_db().await;
        let id = Uuid::new_v4();
        Project::create(
            &db,
            &CreateProject {
                name: "demo".to_string(),
                repo_url: None,
                default_branch: None,
                settings: None,
            },
            id,
        )
        .await
        .unwrap();

        let updated = Project::update(
            &db,
            id,
            &UpdateProject {
                name: None,
                repo_url: None,
                settings: Some(ProjectSettings {
                    max_files: Some(5),
                    ..Default::default()
                }),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.name, "demo");
        assert_eq!(updated.settings.max_files, Some(5));
    }

    #[tokio::test]
    async fn update_missing_project_is_not_found() {
        let db = setup_db().await;
        let err = Project::update(
            &db,
            Uuid::new_v4(),
            &UpdateProject {
                name: Some("x".to_string()),
                repo_url: None,
                settings: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProjectError::NotFound));
    }
}
