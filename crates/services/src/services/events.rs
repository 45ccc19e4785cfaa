use std::{sync::Arc, time::Duration};

use db::{
    DBService,
    events::{
        EVENT_ASK_PERMISSION, EVENT_FILE_SAVED, EVENT_GIT_UPDATED, EVENT_MEMORY_NOTE_CREATED,
        EVENT_PATCH_PROPOSED, EVENT_PROJECT_CREATED, EVENT_PROJECT_UPDATED,
        EVENT_SESSION_FINISHED, EVENT_SESSION_UPDATED, ProjectEventPayload, SessionEventPayload,
    },
    models::{event_outbox::EventOutbox, project::Project, session::Session},
};
use serde_json::json;
use thiserror::Error;
use utils::msg_store::MsgStore;
use uuid::Uuid;

const OUTBOX_POLL_INTERVAL: Duration = Duration::from_millis(250);
const OUTBOX_BATCH_LIMIT: u64 = 100;

#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Database(#[from] db::DbErr),
    #[error(transparent)]
    Session(#[from] db::models::session::SessionError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Publishes outbox rows to the shared event hub that WebSocket clients
/// subscribe to. Failed dispatches stay in the outbox with their error and
/// are retried on the next sweep.
#[derive(Clone)]
pub struct EventService {
    msg_store: Arc<MsgStore>,
    db: DBService,
}

impl EventService {
    pub fn new(db: DBService, msg_store: Arc<MsgStore>) -> Self {
        let service = Self { msg_store, db };
        service.spawn_outbox_worker();
        service
    }

    pub fn msg_store(&self) -> &Arc<MsgStore> {
        &self.msg_store
    }

    fn spawn_outbox_worker(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            service.run_outbox_loop().await;
        });
    }

    async fn run_outbox_loop(&self) {
        loop {
            if let Err(err) = self.flush_pending().await {
                tracing::error!(error = %err, "event outbox flush failed");
            }
            tokio::time::sleep(OUTBOX_POLL_INTERVAL).await;
        }
    }

    async fn flush_pending(&self) -> Result<(), EventError> {
        let entries = EventOutbox::fetch_unpublished(&self.db.pool, OUTBOX_BATCH_LIMIT).await?;
        if entries.is_empty() {
            return Ok(());
        }

        for entry in entries {
            match self.dispatch_entry(&entry).await {
                Ok(()) => {
                    EventOutbox::mark_published(&self.db.pool, entry.id).await?;
                }
                Err(err) => {
                    let err_msg = err.to_string();
                    tracing::warn!(event_id = entry.uuid.to_string(), error = %err_msg, "event dispatch failed");
                    EventOutbox::mark_failed(&self.db.pool, entry.id, &err_msg).await?;
                }
            }
        }

        Ok(())
    }

    async fn dispatch_entry(
        &self,
        entry: &db::entities::event_outbox::Model,
    ) -> Result<(), EventError> {
        match entry.event_type.as_str() {
            EVENT_SESSION_UPDATED | EVENT_SESSION_FINISHED => {
                let payload: SessionEventPayload = serde_json::from_value(entry.payload.clone())?;
                let session = Session::find_by_id(&self.db.pool, payload.session_id).await?;
                self.msg_store.push_event(
                    &entry.event_type,
                    Some(payload.project_id),
                    json!({
                        "session_id": payload.session_id,
                        "session": session,
                    }),
                );
            }
            EVENT_PROJECT_CREATED | EVENT_PROJECT_UPDATED => {
                let payload: ProjectEventPayload = serde_json::from_value(entry.payload.clone())?;
                let project = Project::find_by_id(&self.db.pool, payload.project_id).await?;
                self.msg_store.push_event(
                    &entry.event_type,
                    Some(payload.project_id),
                    json!({
                        "project_id": payload.project_id,
                        "project": project,
                    }),
                );
            }
            EVENT_PATCH_PROPOSED | EVENT_ASK_PERMISSION | EVENT_GIT_UPDATED
            | EVENT_MEMORY_NOTE_CREATED | EVENT_FILE_SAVED => {
                let project_id = extract_project_id(&entry.payload);
                self.msg_store
                    .push_event(&entry.event_type, project_id, entry.payload.clone());
            }
            _ => {
                tracing::debug!(event_type = entry.event_type.as_str(), "unknown event type");
            }
        }

        Ok(())
    }
}

fn extract_project_id(payload: &serde_json::Value) -> Option<Uuid> {
    payload
        .get("project_id")
        .and_then(|value| value.as_str())
        .and_then(|raw| raw.parse().ok())
}
