use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const EVENT_SESSION_UPDATED: &str = "session.updated";
pub const EVENT_SESSION_FINISHED: &str = "session.finished";
pub const EVENT_PATCH_PROPOSED: &str = "patch.proposed";
pub const EVENT_ASK_PERMISSION: &str = "ask.permission";

pub const EVENT_GIT_UPDATED: &str = "git.updated";

pub const EVENT_PROJECT_CREATED: &str = "project.created";
pub const EVENT_PROJECT_UPDATED: &str = "project.updated";

pub const EVENT_MEMORY_NOTE_CREATED: &str = "memory.note.created";
pub const EVENT_FILE_SAVED: &str = "file.saved";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventPayload {
    pub session_id: Uuid,
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEventPayload {
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitEventPayload {
    pub project_id: Uuid,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchProposedPayload {
    pub session_id: Uuid,
    pub project_id: Uuid,
    pub patch: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskPermissionPayload {
    pub session_id: Uuid,
    pub project_id: Uuid,
    pub reason: String,
    pub request: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNoteEventPayload {
    pub note_id: Uuid,
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSavedPayload {
    pub project_id: Uuid,
    pub path: String,
}
