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

use crate::{
    entities::session,
    events::{EVENT_SESSION_UPDATED, SessionEventPayload},
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Session not found")]
    NotFound,
    #[error("Project not found")]
    ProjectNotFound,
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, TS,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Active,
    PendingApproval,
    Completed,
    Failed,
}

impl SessionStatus {
    /// The lifecycle only moves forward; completed/failed are terminal.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, PendingApproval)
                | (Active, Completed)
                | (Active, Failed)
                | (PendingApproval, Active)
                | (PendingApproval, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    #[ts(type = "Date")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct ScopeBudget {
    pub max_tokens: u32,
    pub max_cost: f64,
}

impl Default for ScopeBudget {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            max_cost: 0.5,
        }
    }
}

/// The minimal set of files/symbols a session is authorized to touch.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Scope {
    pub goal: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
    #[serde(default)]
    pub budget: ScopeBudget,
}

impl Scope {
    /// One-time approved widening: union in newly authorized files and
    /// symbols, identity equality, original order preserved.
    pub fn expanded_with(&self, add_files: &[String], add_symbols: &[String]) -> Scope {
        let mut expanded = self.clone();
        for file in add_files {
            if !expanded.files.contains(file) {
                expanded.files.push(file.clone());
            }
        }
        for symbol in add_symbols {
            if !expanded.symbols.contains(symbol) {
                expanded.symbols.push(symbol.clone());
            }
        }
        expanded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Session {
    pub id: Uuid,
    pub project_id: Uuid,
    pub prompt: String,
    pub messages: Vec<SessionMessage>,
    pub scope: Option<Scope>,
    pub diff_summary: Option<String>,
    pub status: SessionStatus,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateSession {
    pub project_id: Uuid,
    pub prompt: String,
}

impl Session {
    fn from_model(model: session::Model, project_id: Uuid) -> Self {
        let messages = serde_json::from_value(model.messages).unwrap_or_default();
        let scope = model
            .scope
            .and_then(|value| serde_json::from_value(value).ok());
        let status = model
            .status
            .parse::<SessionStatus>()
            .unwrap_or(SessionStatus::Failed);
        Self {
            id: model.uuid,
            project_id,
            prompt: model.prompt,
            messages,
            scope,
            diff_summary: model.diff_summary,
            status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    async fn find_model<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<session::Model, SessionError> {
        session::Entity::find()
            .filter(session::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(SessionError::NotFound)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<Self>, SessionError> {
        let record = session::Entity::find()
            .filter(session::Column::Uuid.eq(id))
            .one(db)
            .await?;

        match record {
            Some(model) => {
                let project_id = ids::project_uuid_by_row_id(db, model.project_id)
                    .await?
                    .ok_or(SessionError::ProjectNotFound)?;
                Ok(Some(Self::from_model(model, project_id)))
            }
            None => Ok(None),
        }
    }

    pub async fn find_by_project_id<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<Self>, SessionError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(SessionError::ProjectNotFound)?;

        let records = session::Entity::find()
            .filter(session::Column::ProjectId.eq(project_row_id))
            .order_by_desc(session::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(records
            .into_iter()
            .map(|model| Self::from_model(model, project_id))
            .collect())
    }

    /// Creates the session already carrying the user's message, in `active`
    /// status. The assistant reply arrives later via the event stream.
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateSession,
        id: Uuid,
    ) -> Result<Self, SessionError> {
        let project_row_id = ids::project_row_id(db, data.project_id)
            .await?
            .ok_or(SessionError::ProjectNotFound)?;

        let now = Utc::now();
        let messages = vec![SessionMessage {
            role: MessageRole::User,
            content: data.prompt.clone(),
            timestamp: now,
        }];
        let active = session::ActiveModel {
            uuid: Set(id),
            project_id: Set(project_row_id),
            prompt: Set(data.prompt.clone()),
            messages: Set(serde_json::to_value(&messages)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            scope: Set(None),
            diff_summary: Set(None),
            status: Set(SessionStatus::Active.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        Self::enqueue_updated(db, id, data.project_id).await?;
        Ok(Self::from_model(model, data.project_id))
    }

    /// Moves the session forward through its lifecycle; illegal moves are
    /// rejected rather than silently applied.
    pub async fn transition<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        next: SessionStatus,
    ) -> Result<(), SessionError> {
        let model = Self::find_model(db, id).await?;
        let current = model
            .status
            .parse::<SessionStatus>()
            .unwrap_or(SessionStatus::Failed);
        if !current.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        let project_id = ids::project_uuid_by_row_id(db, model.project_id)
            .await?
            .ok_or(SessionError::ProjectNotFound)?;
        let mut active: session::ActiveModel = model.into();
        active.status = Set(next.to_string());
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        Self::enqueue_updated(db, id, project_id).await?;
        Ok(())
    }

    pub async fn set_scope<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        scope: &Scope,
    ) -> Result<(), SessionError> {
        let model = Self::find_model(db, id).await?;
        let mut active: session::ActiveModel = model.into();
        active.scope = Set(Some(
            serde_json::to_value(scope).map_err(|err| DbErr::Custom(err.to_string()))?,
        ));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    pub async fn set_diff_summary<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        summary: &str,
    ) -> Result<(), SessionError> {
        let model = Self::find_model(db, id).await?;
        let mut active: session::ActiveModel = model.into();
        active.diff_summary = Set(Some(summary.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    /// Message log is append-only.
    pub async fn append_message<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<(), SessionError> {
        let model = Self::find_model(db, id).await?;
        let mut messages: Vec<SessionMessage> =
            serde_json::from_value(model.messages.clone()).unwrap_or_default();
        messages.push(SessionMessage {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });

        let mut active: session::ActiveModel = model.into();
        active.messages = Set(serde_json::to_value(&messages)
            .map_err(|err| DbErr::Custom(err.to_string()))?);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    async fn enqueue_updated<C: ConnectionTrait>(
        db: &C,
        session_id: Uuid,
        project_id: Uuid,
    ) -> Result<(), DbErr> {
        let payload = serde_json::to_value(SessionEventPayload {
            session_id,
            project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_SESSION_UPDATED, "session", session_id, payload).await
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
    async fn create_records_user_message_and_active_status() {
        let (db, project_id) = setup().await;
        let id = Uuid::new_v4();
        let session = Session::create(
            &db,
            &CreateSession {
                project_id,
                prompt: "add a login page".to_string(),
            },
            id,
        )
        .await
        .unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, MessageRole::User);
        assert_eq!(session.messages[0].content, "add a login page");
    }

    #[tokio::test]
    async fn lifecycle_only_moves_forward() {
        let (db, project_id) = setup().await;
        let id = Uuid::new_v4();
        Session::create(
            &db,
            &CreateSession {
                project_id,
                prompt: "x".to_string(),
            },
            id,
        )
        .await
        .unwrap();

        Session::transition(&db, id, SessionStatus::PendingApproval)
            .await
            .unwrap();
        Session::transition(&db, id, SessionStatus::Active)
            .await
            .unwrap();
        Session::transition(&db, id, SessionStatus::Completed)
            .await
            .unwrap();

        let err = Session::transition(&db, id, SessionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn scope_expansion_unions_without_duplicates() {
        let scope = Scope {
            goal: "g".to_string(),
            files: vec!["a.ts".to_string(), "b.ts".to_string()],
            symbols: vec!["foo".to_string()],
            forbidden: vec![],
            budget: ScopeBudget::default(),
        };

        let expanded = scope.expanded_with(
            &["b.ts".to_string(), "c.ts".to_string()],
            &["foo".to_string(), "bar".to_string()],
        );

        assert_eq!(expanded.files, vec!["a.ts", "b.ts", "c.ts"]);
        assert_eq!(expanded.symbols, vec!["foo", "bar"]);
    }
}
