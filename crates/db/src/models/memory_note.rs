use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entities::memory_note,
    events::{EVENT_MEMORY_NOTE_CREATED, MemoryNoteEventPayload},
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum MemoryNoteError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    ProjectNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct MemoryNote {
    pub id: Uuid,
    pub project_id: Uuid,
    pub content: String,
    pub tags: Vec<String>,
    pub links: Vec<String>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateMemoryNote {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl MemoryNote {
    fn from_model(model: memory_note::Model, project_id: Uuid) -> Self {
        Self {
            id: model.uuid,
            project_id,
            content: model.content,
            tags: serde_json::from_value(model.tags).unwrap_or_default(),
            links: serde_json::from_value(model.links).unwrap_or_default(),
            created_at: model.created_at,
        }
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        data: &CreateMemoryNote,
    ) -> Result<Self, MemoryNoteError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(MemoryNoteError::ProjectNotFound)?;

        let note_id = Uuid::new_v4();
        let active = memory_note::ActiveModel {
            uuid: Set(note_id),
            project_id: Set(project_row_id),
            content: Set(data.content.clone()),
            tags: Set(serde_json::to_value(&data.tags)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            links: Set(serde_json::to_value(&data.links)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(MemoryNoteEventPayload {
            note_id,
            project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_MEMORY_NOTE_CREATED, "memory_note", note_id, payload)
            .await?;
        Ok(Self::from_model(model, project_id))
    }

    pub async fn find_recent_by_project<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Self>, MemoryNoteError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(MemoryNoteError::ProjectNotFound)?;

        let records = memory_note::Entity::find()
            .filter(memory_note::Column::ProjectId.eq(project_row_id))
            .order_by_desc(memory_note::Column::CreatedAt)
            .limit(limit)
            .all(db)
            .await?;

        Ok(records
            .into_iter()
            .map(|model| Self::from_model(model, project_id))
            .collect())
    }

    /// Keyword search over content and tags, newest first. Tags live in a
    /// JSON column, so the tag match runs on the loaded rows.
    pub async fn search<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        query: &str,
    ) -> Result<Vec<Self>, MemoryNoteError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(MemoryNoteError::ProjectNotFound)?;

        let records = memory_note::Entity::find()
            .filter(memory_note::Column::ProjectId.eq(project_row_id))
            .order_by_desc(memory_note::Column::CreatedAt)
            .all(db)
            .await?;

        let notes = records
            .into_iter()
            .map(|model| Self::from_model(model, project_id));

        if query.trim().is_empty() {
            return Ok(notes.collect());
        }

        let needle = query.to_lowercase();
        Ok(notes
            .filter(|note| {
                note.content.to_lowercase().contains(&needle)
                    || note
                        .tags
                        .iter()
                        .any(|tag| tag.to_lowercase().contains(&needle))
            })
            .collect())
    }

    pub async fn count_by_project<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
    ) -> Result<u64, MemoryNoteError> {
        let project_row_id = ids::project_row_id(db, project_id)
            .await?
            .ok_or(MemoryNoteError::ProjectNotFound)?;

        Ok(memory_note::Entity::find()
            .filter(memory_note::Column::ProjectId.eq(project_row_id))
            .count(db)
            .await?)
    }
}
