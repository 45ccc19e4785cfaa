use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::{entities::file_change, models::ids};

#[derive(Debug, Error)]
pub enum FileChangeError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("File change not found")]
    NotFound,
    #[error("Session not found")]
    SessionNotFound,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, TS,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

/// One contiguous diff region, individually approvable. `approved` is the
/// sole gate for whether the content reaches the file store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Hunk {
    pub id: String,
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub content: String,
    pub rationale: String,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct FileChange {
    pub id: Uuid,
    pub session_id: Uuid,
    pub file_path: String,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
    pub applied: bool,
    pub pre_image: Option<String>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
}

impl FileChange {
    fn from_model(model: file_change::Model, session_id: Uuid) -> Self {
        let hunks = serde_json::from_value(model.hunks).unwrap_or_default();
        let change_type = model
            .change_type
            .parse::<ChangeType>()
            .unwrap_or(ChangeType::Modify);
        Self {
            id: model.uuid,
            session_id,
            file_path: model.file_path,
            change_type,
            hunks,
            applied: model.applied,
            pre_image: model.pre_image,
            created_at: model.created_at,
        }
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        session_id: Uuid,
        file_path: &str,
        change_type: ChangeType,
        hunks: &[Hunk],
    ) -> Result<Self, FileChangeError> {
        let session_row_id = ids::session_row_id(db, session_id)
            .await?
            .ok_or(FileChangeError::SessionNotFound)?;

        let active = file_change::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            session_id: Set(session_row_id),
            file_path: Set(file_path.to_string()),
            change_type: Set(change_type.to_string()),
            hunks: Set(serde_json::to_value(hunks)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            applied: Set(false),
            pre_image: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        Ok(Self::from_model(model, session_id))
    }

    pub async fn find_by_session_id<C: ConnectionTrait>(
        db: &C,
        session_id: Uuid,
    ) -> Result<Vec<Self>, FileChangeError> {
        let session_row_id = ids::session_row_id(db, session_id)
            .await?
            .ok_or(FileChangeError::SessionNotFound)?;

        let records = file_change::Entity::find()
            .filter(file_change::Column::SessionId.eq(session_row_id))
            .order_by_asc(file_change::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(records
            .into_iter()
            .map(|model| Self::from_model(model, session_id))
            .collect())
    }

    pub async fn update_hunks<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        hunks: &[Hunk],
    ) -> Result<(), FileChangeError> {
        let model = Self::find_model(db, id).await?;
        let mut active: file_change::ActiveModel = model.into();
        active.hunks = Set(serde_json::to_value(hunks)
            .map_err(|err| DbErr::Custom(err.to_string()))?);
        active.update(db).await?;
        Ok(())
    }

    pub async fn set_applied<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        applied: bool,
    ) -> Result<(), FileChangeError> {
        let model = Self::find_model(db, id).await?;
        let mut active: file_change::ActiveModel = model.into();
        active.applied = Set(applied);
        active.update(db).await?;
        Ok(())
    }

    /// Captured once, before the first byte is written, so revert can undo.
    pub async fn record_pre_image<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        pre_image: &str,
    ) -> Result<(), FileChangeError> {
        let model = Self::find_model(db, id).await?;
        if model.pre_image.is_some() {
            return Ok(());
        }
        let mut active: file_change::ActiveModel = model.into();
        active.pre_image = Set(Some(pre_image.to_string()));
        active.update(db).await?;
        Ok(())
    }

    async fn find_model<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<file_change::Model, FileChangeError> {
        file_change::Entity::find()
            .filter(file_change::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(FileChangeError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;
    use crate::models::{
        project::{CreateProject, Project},
        session::{CreateSession, Session},
    };

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
        let session_id = Uuid::new_v4();
        Session::create(
            &db,
            &CreateSession {
                project_id,
                prompt: "x".to_string(),
            },
            session_id,
        )
        .await
        .unwrap();
        (db, session_id)
    }

    fn hunk(id: &str) -> Hunk {
        Hunk {
            id: id.to_string(),
            old_start: 1,
            old_lines: 1,
            new_start: 1,
            new_lines: 2,
            content: "-old\n+new\n+more\n".to_string(),
            rationale: "test".to_string(),
            approved: false,
        }
    }

    #[tokio::test]
    async fn hunks_round_trip_through_json_column() {
        let (db, session_id) = setup().await;
        let change = FileChange::create(
            &db,
            session_id,
            "src/app.ts",
            ChangeType::Modify,
            &[hunk("h1"), hunk("h2")],
        )
        .await
        .unwrap();

        let loaded = FileChange::find_by_session_id(&db, session_id)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, change.id);
        assert_eq!(loaded[0].hunks.len(), 2);
        assert_eq!(loaded[0].hunks[1].id, "h2");
        assert!(!loaded[0].applied);
    }

    #[tokio::test]
    async fn pre_image_is_recorded_only_once() {
        let (db, session_id) = setup().await;
        let change =
            FileChange::create(&db, session_id, "a.txt", ChangeType::Modify, &[hunk("h")])
                .await
                .unwrap();

        FileChange::record_pre_image(&db, change.id, "original")
            .await
            .unwrap();
        FileChange::record_pre_image(&db, change.id, "clobbered")
            .await
            .unwrap();

        let loaded = FileChange::find_by_session_id(&db, session_id)
            .await
            .unwrap();
        assert_eq!(loaded[0].pre_image.as_deref(), Some("original"));
    }
}
