use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entities::project_file,
    events::{EVENT_FILE_SAVED, FileSavedPayload},
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum ProjectFileError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    ProjectNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProjectFileMeta {
    pub path: String,
    pub size: usize,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

/// Raw per-project file store: save/get/list keyed by relative path.
pub struct ProjectFile;

impl ProjectFile {
    pub async fn save<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        path: &str,
        content: &str,
    ) -> Result<(), ProjectFileError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(ProjectFileError::ProjectNotFound)?;

        let existing = project_file::Entity::find()
            .filter(project_file::Column::ProjectId.eq(project_row_id))
            .filter(project_file::Column::Path.eq(path))
            .one(db)
            .await?;

        match existing {
            Some(record) => {
                let mut active: project_file::ActiveModel = record.into();
                active.content = Set(content.to_string());
                active.updated_at = Set(Utc::now());
                active.update(db).await?;
            }
            None => {
                let active = project_file::ActiveModel {
                    project_id: Set(project_row_id),
                    path: Set(path.to_string()),
                    content: Set(content.to_string()),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                };
                active.insert(db).await?;
            }
        }

        let payload = serde_json::to_value(FileSavedPayload {
            project_id,
            path: path.to_string(),
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_FILE_SAVED, "project_file", project_id, payload).await?;
        Ok(())
    }

    pub async fn get<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        path: &str,
    ) -> Result<Option<String>, ProjectFileError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(ProjectFileError::ProjectNotFound)?;

        let record = project_file::Entity::find()
            .filter(project_file::Column::ProjectId.eq(project_row_id))
            .filter(project_file::Column::Path.eq(path))
            .one(db)
            .await?;
        Ok(record.map(|model| model.content))
    }

    pub async fn list<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<ProjectFileMeta>, ProjectFileError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(ProjectFileError::ProjectNotFound)?;

        let records = project_file::Entity::find()
            .filter(project_file::Column::ProjectId.eq(project_row_id))
            .order_by_asc(project_file::Column::Path)
            .all(db)
            .await?;

        Ok(records
            .into_iter()
            .map(|model| ProjectFileMeta {
                size: model.content.len(),
                path: model.path,
                updated_at: model.updated_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;
    use crate::models::project::{CreateProject, Project};

    async fn setup() -> (sea_orm::DatabaseConnection, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        let project_id = Uuid::new_v4();
        Project::create(
            &db,
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
        (db, project_id)
    }

    #[tokio::test]
    async fn save_overwrites_and_list_reports_sizes() {
        let (db, project_id) = setup().await;

        ProjectFile::save(&db, project_id, "index.html", "<html>")
            .await
            .unwrap();
        ProjectFile::save(&db, project_id, "index.html", "<html></html>")
            .await
            .unwrap();
        ProjectFile::save(&db, project_id, "app.js", "console.log(1)")
            .await
            .unwrap();

        let content = ProjectFile::get(&db, project_id, "index.html")
            .await
            .unwrap();
        assert_eq!(content.as_deref(), Some("<html></html>"));

        let listing = ProjectFile::list(&db, project_id).await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].path, "app.js");
        assert_eq!(listing[1].size, "<html></html>".len());
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let (db, project_id) = setup().await;
        let content = ProjectFile::get(&db, project_id, "nope.txt").await.unwrap();
        assert!(content.is_none());
    }
}
