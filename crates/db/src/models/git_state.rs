use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::{entities::git_state, models::ids};

#[derive(Debug, Error)]
pub enum GitStateError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    ProjectNotFound,
}

/// Cached mirror of the repository's status. Refreshed after every git
/// operation; the repository itself stays the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GitState {
    pub project_id: Uuid,
    pub branch: String,
    pub ahead: i32,
    pub behind: i32,
    pub last_commit: Option<String>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct GitStateUpdate {
    pub branch: Option<String>,
    pub ahead: Option<i32>,
    pub behind: Option<i32>,
    pub last_commit: Option<String>,
}

impl GitState {
    fn from_model(model: git_state::Model, project_id: Uuid) -> Self {
        Self {
            project_id,
            branch: model.branch,
            ahead: model.ahead,
            behind: model.behind,
            last_commit: model.last_commit,
            updated_at: model.updated_at,
        }
    }

    pub async fn find_by_project_id<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
    ) -> Result<Option<Self>, GitStateError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(GitStateError::ProjectNotFound)?;

        let record = git_state::Entity::find()
            .filter(git_state::Column::ProjectId.eq(project_row_id))
            .one(db)
            .await?;
        Ok(record.map(|model| Self::from_model(model, project_id)))
    }

    pub async fn upsert<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        update: GitStateUpdate,
    ) -> Result<Self, GitStateError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(GitStateError::ProjectNotFound)?;

        let existing = git_state::Entity::find()
            .filter(git_state::Column::ProjectId.eq(project_row_id))
            .one(db)
            .await?;

        let now = Utc::now();
        let model = match existing {
            Some(record) => {
                let mut active: git_state::ActiveModel = record.into();
                if let Some(branch) = update.branch {
                    active.branch = Set(branch);
                }
                if let Some(ahead) = update.ahead {
                    active.ahead = Set(ahead);
                }
                if let Some(behind) = update.behind {
                    active.behind = Set(behind);
                }
                if update.last_commit.is_some() {
                    active.last_commit = Set(update.last_commit);
                }
                active.updated_at = Set(now);
                active.update(db).await?
            }
            None => {
                let active = git_state::ActiveModel {
                    project_id: Set(project_row_id),
                    branch: Set(update.branch.unwrap_or_else(|| "main".to_string())),
                    ahead: Set(update.ahead.unwrap_or(0)),
                    behind: Set(update.behind.unwrap_or(0)),
                    last_commit: Set(update.last_commit),
                    updated_at: Set(now),
                    ..Default::default()
                };
                active.insert(db).await?
            }
        };

        Ok(Self::from_model(model, project_id))
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;
    use crate::models::project::{CreateProject, Project};

    #[tokio::test]
    async fn upsert_inserts_then_patches() {
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

        let state = GitState::upsert(&db, project_id, GitStateUpdate::default())
            .await
            .unwrap();
        assert_eq!(state.branch, "main");
        assert_eq!(state.ahead, 0);

        let state = GitState::upsert(
            &db,
            project_id,
            GitStateUpdate {
                ahead: Some(2),
                last_commit: Some("abc123".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(state.branch, "main");
        assert_eq!(state.ahead, 2);
        assert_eq!(state.last_commit.as_deref(), Some("abc123"));
    }
}
