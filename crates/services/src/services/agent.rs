use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use db::{
    events::{
        AskPermissionPayload, EVENT_ASK_PERMISSION, EVENT_PATCH_PROPOSED, EVENT_SESSION_FINISHED,
        EVENT_SESSION_UPDATED, PatchProposedPayload, SessionEventPayload,
    },
    models::{
        event_outbox::EventOutbox,
        file_change::{ChangeType, FileChange, FileChangeError, Hunk},
        project::Project,
        project_file::{ProjectFile, ProjectFileError},
        session::{MessageRole, Scope, ScopeBudget, Session, SessionError, SessionStatus},
    },
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    index::ProjectIndexService,
    memory::{MemoryError, MemoryService},
    model_router::{
        ChatMessage, CompletionOptions, ModelRouter, TaskDescriptor, TaskLevel, TaskType,
    },
    patch::{self, PatchApplyError},
    scope::{ScopeError, validate_scope},
};

/// Rough completion budgets used for routing, not billing.
const INTENT_TOKEN_ESTIMATE: u32 = 2000;
const PATCH_TOKEN_ESTIMATE: u32 = 4000;

/// Per-file prompt context is capped so one large file cannot crowd out
/// the rest of the scope.
const CONTEXT_FILE_CHAR_LIMIT: usize = 2000;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Intent creation failed: {0}")]
    IntentCreation(String),
    #[error("Patch generation failed: {0}")]
    PatchGeneration(String),
    #[error("Hunk no longer applies to {path}: {source}")]
    HunkApplyConflict {
        path: String,
        source: PatchApplyError,
    },
    #[error("Project not found")]
    ProjectNotFound,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    FileChange(#[from] FileChangeError),
    #[error(transparent)]
    ProjectFile(#[from] ProjectFileError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Database(#[from] db::DbErr),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// What a processing pass produced: either a parked session awaiting the
/// user's yes/no, or a persisted patch proposal.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutcome {
    PermissionRequired { reason: String, request: String },
    PatchProposed(ProposedPatch),
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProposedPatch {
    pub summary: String,
    pub files: Vec<ProposedFile>,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct ProposedFile {
    pub path: String,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
}

// Untrusted reply shapes. The prompts ask for camelCase JSON; anything
// that does not parse is a typed failure, never trusted as-is.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBudget {
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_max_cost")]
    max_cost: f64,
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_cost() -> f64 {
    0.5
}

impl Default for RawBudget {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_cost: default_max_cost(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawScope {
    goal: String,
    files: Vec<String>,
    #[serde(default)]
    symbols: Vec<String>,
    #[serde(default)]
    forbidden: Vec<String>,
    #[serde(default)]
    budget: RawBudget,
}

impl From<RawScope> for Scope {
    fn from(raw: RawScope) -> Self {
        let mut files = Vec::new();
        for file in raw.files {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        Scope {
            goal: raw.goal,
            files,
            symbols: raw.symbols,
            forbidden: raw.forbidden,
            budget: ScopeBudget {
                max_tokens: raw.budget.max_tokens,
                max_cost: raw.budget.max_cost,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPatch {
    summary: String,
    files: Vec<RawFilePatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilePatch {
    path: String,
    change_type: ChangeType,
    hunks: Vec<RawHunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHunk {
    old_start: u32,
    old_lines: u32,
    new_start: u32,
    new_lines: u32,
    content: String,
    #[serde(default)]
    rationale: String,
}

/// Drives a session from prompt to approved patch: intent extraction,
/// scope validation, patch proposal, hunk approval, apply and revert.
#[derive(Clone)]
pub struct AgentService {
    model_router: Arc<ModelRouter>,
    memory: MemoryService,
    index: ProjectIndexService,
    apply_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AgentService {
    pub fn new(
        model_router: Arc<ModelRouter>,
        memory: MemoryService,
        index: ProjectIndexService,
    ) -> Self {
        Self {
            model_router,
            memory,
            index,
            apply_locks: Arc::new(DashMap::new()),
        }
    }

    /// File-store writes are serialized per project so two sessions
    /// touching overlapping files cannot interleave partial patches.
    fn project_lock(&self, project_id: Uuid) -> Arc<Mutex<()>> {
        self.apply_locks
            .entry(project_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn process_session(
        &self,
        db: &DatabaseConnection,
        session: &Session,
    ) -> Result<AgentOutcome, AgentError> {
        match self.run_to_proposal(db, session).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.mark_failed(db, session.id).await;
                Err(err)
            }
        }
    }

    async fn run_to_proposal(
        &self,
        db: &DatabaseConnection,
        session: &Session,
    ) -> Result<AgentOutcome, AgentError> {
        let scope = self
            .create_intent(db, &session.prompt, session.project_id)
            .await?;
        Session::set_scope(db, session.id, &scope).await?;

        let check = validate_scope(db, &scope, session.project_id).await?;
        if check.needs_permission {
            Session::transition(db, session.id, SessionStatus::PendingApproval).await?;
            let reason = check.reason.unwrap_or_default();
            let request = check.request.unwrap_or_default();
            let payload = serde_json::to_value(AskPermissionPayload {
                session_id: session.id,
                project_id: session.project_id,
                reason: reason.clone(),
                request: request.clone(),
            })?;
            EventOutbox::enqueue(db, EVENT_ASK_PERMISSION, "session", session.id, payload).await?;
            tracing::info!(session_id = %session.id, %reason, "session parked for permission");
            return Ok(AgentOutcome::PermissionRequired { reason, request });
        }

        self.propose_and_record(db, session.id, session.project_id, &scope)
            .await
    }

    /// Resumes a parked session with the user-approved (possibly expanded)
    /// scope. Intent extraction is not re-run and the scope is not
    /// re-validated: approval is final.
    pub async fn continue_session(
        &self,
        db: &DatabaseConnection,
        session_id: Uuid,
        updated_scope: &Scope,
    ) -> Result<AgentOutcome, AgentError> {
        let session = Session::find_by_id(db, session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        Session::transition(db, session_id, SessionStatus::Active).await?;
        Session::set_scope(db, session_id, updated_scope).await?;

        match self
            .propose_and_record(db, session_id, session.project_id, updated_scope)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.mark_failed(db, session_id).await;
                Err(err)
            }
        }
    }

    async fn propose_and_record(
        &self,
        db: &DatabaseConnection,
        session_id: Uuid,
        project_id: Uuid,
        scope: &Scope,
    ) -> Result<AgentOutcome, AgentError> {
        let patch = self.propose_patch(db, scope, project_id).await?;

        for file in &patch.files {
            FileChange::create(db, session_id, &file.path, file.change_type, &file.hunks).await?;
        }

        Session::transition(db, session_id, SessionStatus::Completed).await?;
        Session::set_diff_summary(db, session_id, &patch.summary).await?;
        Session::append_message(db, session_id, MessageRole::Assistant, &patch.summary).await?;
        // Distill the outcome into project memory for future prompts.
        self.memory
            .add_session_note(db, session_id, &patch.summary, Vec::new())
            .await?;

        let payload = serde_json::to_value(PatchProposedPayload {
            session_id,
            project_id,
            patch: serde_json::to_value(&patch)?,
        })?;
        EventOutbox::enqueue(db, EVENT_PATCH_PROPOSED, "session", session_id, payload).await?;
        let finished = serde_json::to_value(SessionEventPayload {
            session_id,
            project_id,
        })?;
        EventOutbox::enqueue(db, EVENT_SESSION_FINISHED, "session", session_id, finished).await?;

        Ok(AgentOutcome::PatchProposed(patch))
    }

    pub async fn create_intent(
        &self,
        db: &DatabaseConnection,
        prompt: &str,
        project_id: Uuid,
    ) -> Result<Scope, AgentError> {
        let project = Project::find_by_id(db, project_id)
            .await?
            .ok_or(AgentError::ProjectNotFound)?;
        let hot_notes = self.memory.hot_for_prompt(db, project_id).await?;
        let symbols = self.index.symbol_names(db, project_id, 20).await?;

        let memory_digest = hot_notes
            .iter()
            .map(|note| format!("- {}", note.content))
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            "You are Reme, a strict-scope AI coding agent.\n\
             Parse the user's intent and determine the minimal scope needed.\n\n\
             STRICT RULES:\n\
             - Only touch files explicitly requested\n\
             - No refactoring unless asked\n\
             - No style changes unless permitted\n\
             - Ask permission for scope expansion with ONE concise question\n\n\
             Project context: {}\n\
             Recent memory:\n{}\n\
             Available symbols: {}\n\n\
             Return JSON:\n\
             {{\"goal\": \"concise goal statement\", \"files\": [\"files to modify\"], \
             \"symbols\": [\"symbols to change\"], \"forbidden\": [\"paths to avoid\"], \
             \"budget\": {{\"maxTokens\": 1000, \"maxCost\": 0.5}}}}",
            project.name,
            memory_digest,
            symbols.join(", "),
        );

        let task = TaskDescriptor {
            task_type: TaskType::Code,
            complexity: TaskLevel::Medium,
            urgency: TaskLevel::Medium,
            tokens: INTENT_TOKEN_ESTIMATE,
            prefer_local: None,
        };
        let model = self
            .model_router
            .route(&task)
            .map_err(|err| AgentError::IntentCreation(err.to_string()))?
            .clone();
        let completion = self
            .model_router
            .generate(
                &model,
                &[ChatMessage::system(system), ChatMessage::user(prompt)],
                &CompletionOptions {
                    temperature: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| AgentError::IntentCreation(err.to_string()))?;

        let raw: RawScope = parse_json_reply(&completion.content)
            .map_err(|err| AgentError::IntentCreation(format!("unparseable intent reply: {err}")))?;
        Ok(raw.into())
    }

    pub async fn propose_patch(
        &self,
        db: &DatabaseConnection,
        scope: &Scope,
        project_id: Uuid,
    ) -> Result<ProposedPatch, AgentError> {
        let context_files = self.gather_context(db, &scope.files, project_id).await?;
        let warm_notes = self.memory.warm(db, project_id, &scope.goal).await?;

        let context_digest = context_files
            .iter()
            .map(|file| {
                let content: String = file.content.chars().take(CONTEXT_FILE_CHAR_LIMIT).collect();
                format!("=== {} ===\n{}", file.path, content)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let memory_digest = warm_notes
            .iter()
            .map(|note| note.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            "You are Reme. Generate the minimal patch to achieve the goal.\n\n\
             RULES:\n\
             - Only modify specified files: {}\n\
             - Provide rationale for each hunk\n\
             - Generate working code, no placeholders\n\
             - Follow project style patterns\n\n\
             Context files:\n{}\n\n\
             Relevant memory:\n{}\n\n\
             Goal: {}\n\n\
             Return JSON:\n\
             {{\"summary\": \"brief change description\", \"files\": [{{\"path\": \"file/path.ts\", \
             \"changeType\": \"modify|create|delete\", \"hunks\": [{{\"oldStart\": 10, \
             \"oldLines\": 3, \"newStart\": 10, \"newLines\": 5, \
             \"content\": \"unified diff content\", \"rationale\": \"why\"}}]}}]}}",
            scope.files.join(", "),
            context_digest,
            memory_digest,
            scope.goal,
        );

        let task = TaskDescriptor {
            task_type: TaskType::Code,
            complexity: TaskLevel::High,
            urgency: TaskLevel::Medium,
            tokens: PATCH_TOKEN_ESTIMATE,
            prefer_local: None,
        };
        let model = self
            .model_router
            .route(&task)
            .map_err(|err| AgentError::PatchGeneration(err.to_string()))?
            .clone();
        let completion = self
            .model_router
            .generate(
                &model,
                &[
                    ChatMessage::system(system),
                    ChatMessage::user(format!("Generate patch for: {}", scope.goal)),
                ],
                &CompletionOptions {
                    temperature: Some(0.2),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| AgentError::PatchGeneration(err.to_string()))?;

        let raw: RawPatch = parse_json_reply(&completion.content)
            .map_err(|err| AgentError::PatchGeneration(format!("unparseable patch reply: {err}")))?;

        let stamp = Utc::now().timestamp_millis();
        let files = raw
            .files
            .into_iter()
            .map(|file| {
                let hunks = file
                    .hunks
                    .into_iter()
                    .enumerate()
                    .map(|(index, hunk)| Hunk {
                        id: format!("{}-{}-{}", file.path, index, stamp),
                        old_start: hunk.old_start,
                        old_lines: hunk.old_lines,
                        new_start: hunk.new_start,
                        new_lines: hunk.new_lines,
                        content: hunk.content,
                        rationale: hunk.rationale,
                        approved: false,
                    })
                    .collect();
                ProposedFile {
                    path: file.path,
                    change_type: file.change_type,
                    hunks,
                }
            })
            .collect();

        Ok(ProposedPatch {
            summary: raw.summary,
            files,
        })
    }

    /// Current content of every scoped file; an empty string means the file
    /// does not exist yet and the patch is a create.
    async fn gather_context(
        &self,
        db: &DatabaseConnection,
        files: &[String],
        project_id: Uuid,
    ) -> Result<Vec<ContextFile>, AgentError> {
        let mut context = Vec::with_capacity(files.len());
        for path in files {
            let content = ProjectFile::get(db, project_id, path)
                .await?
                .unwrap_or_default();
            context.push(ContextFile {
                path: path.clone(),
                content,
            });
        }
        Ok(context)
    }

    /// Approves the selected hunks (all of them when the selection is
    /// empty) and materializes approved content into the file store.
    ///
    /// The base text is always the stored pre-image, captured before the
    /// first write, which makes re-applying idempotent and turns genuine
    /// drift into a conflict instead of a double-apply.
    pub async fn apply_hunks(
        &self,
        db: &DatabaseConnection,
        session_id: Uuid,
        selected: &[String],
    ) -> Result<(), AgentError> {
        let session = Session::find_by_id(db, session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        let lock = self.project_lock(session.project_id);
        let _guard = lock.lock().await;

        let approve_all = selected.is_empty();
        let changes = FileChange::find_by_session_id(db, session_id).await?;

        for change in changes {
            let hunks: Vec<Hunk> = change
                .hunks
                .iter()
                .map(|hunk| {
                    let mut hunk = hunk.clone();
                    if approve_all || selected.contains(&hunk.id) {
                        hunk.approved = true;
                    }
                    hunk
                })
                .collect();
            FileChange::update_hunks(db, change.id, &hunks).await?;

            let approved: Vec<&Hunk> = hunks.iter().filter(|hunk| hunk.approved).collect();
            if approved.is_empty() {
                continue;
            }

            let base = match &change.pre_image {
                Some(pre_image) => pre_image.clone(),
                None => {
                    let current = ProjectFile::get(db, session.project_id, &change.file_path)
                        .await?
                        .unwrap_or_default();
                    FileChange::record_pre_image(db, change.id, &current).await?;
                    current
                }
            };

            let patched = patch::apply_hunks(&base, &approved).map_err(|source| {
                AgentError::HunkApplyConflict {
                    path: change.file_path.clone(),
                    source,
                }
            })?;
            ProjectFile::save(db, session.project_id, &change.file_path, &patched).await?;
            FileChange::set_applied(db, change.id, true).await?;
        }

        let payload = serde_json::to_value(SessionEventPayload {
            session_id,
            project_id: session.project_id,
        })?;
        EventOutbox::enqueue(db, EVENT_SESSION_FINISHED, "session", session_id, payload).await?;
        Ok(())
    }

    /// True undo: restores pre-image bytes for every applied change.
    pub async fn revert_session(
        &self,
        db: &DatabaseConnection,
        session_id: Uuid,
    ) -> Result<(), AgentError> {
        let session = Session::find_by_id(db, session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        let lock = self.project_lock(session.project_id);
        let _guard = lock.lock().await;

        let changes = FileChange::find_by_session_id(db, session_id).await?;
        for change in changes {
            if change.applied
                && let Some(pre_image) = &change.pre_image
            {
                ProjectFile::save(db, session.project_id, &change.file_path, pre_image).await?;
            }
            FileChange::set_applied(db, change.id, false).await?;
        }

        let payload = serde_json::to_value(SessionEventPayload {
            session_id,
            project_id: session.project_id,
        })?;
        EventOutbox::enqueue(db, EVENT_SESSION_UPDATED, "session", session_id, payload).await?;
        Ok(())
    }

    async fn mark_failed(&self, db: &DatabaseConnection, session_id: Uuid) {
        if let Err(err) = Session::transition(db, session_id, SessionStatus::Failed).await {
            tracing::warn!(session_id = %session_id, error = %err, "failed to mark session failed");
        }
    }
}

struct ContextFile {
    path: String,
    content: String,
}

/// Models wrap JSON in markdown fences often enough that stripping them is
/// part of the contract.
fn parse_json_reply<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, serde_json::Error> {
    let trimmed = content.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        match rest.rfind("```") {
            Some(end) => {
                let inner = &rest[..end];
                inner.split_once('\n').map(|(_, body)| body).unwrap_or(inner)
            }
            None => trimmed,
        }
    } else {
        trimmed
    };
    serde_json::from_str(body)
}

#[cfg(test)]
mod tests {
    use db::models::project::{CreateProject, ProjectSettings};
    use db::models::session::CreateSession;
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;
    use crate::services::{
        config::MemorySettings,
        model_router::test_support::{FakeBackend, router_with},
    };

    const INTENT_REPLY: &str = r#"{
        "goal": "add a greeting",
        "files": ["src/hello.txt"],
        "symbols": [],
        "forbidden": [],
        "budget": {"maxTokens": 1000, "maxCost": 0.5}
    }"#;

    const PATCH_REPLY: &str = r#"```json
{
    "summary": "Add greeting file",
    "files": [{
        "path": "src/hello.txt",
        "changeType": "create",
        "hunks": [{
            "oldStart": 0,
            "oldLines": 0,
            "newStart": 1,
            "newLines": 1,
            "content": "+hello world",
            "rationale": "requested greeting"
        }]
    }]
}
```"#;

    async fn setup(settings: ProjectSettings) -> (sea_orm::DatabaseConnection, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        let project_id = Uuid::new_v4();
        Project::create(
            &db,
            &CreateProject {
                name: "demo".to_string(),
                repo_url: None,
                default_branch: None,
                settings: Some(settings),
            },
            project_id,
        )
        .await
        .unwrap();
        (db, project_id)
    }

    fn agent_with_replies(replies: Vec<Result<String, String>>) -> AgentService {
        let anthropic = Arc::new(FakeBackend::with_replies(replies));
        let router = router_with(
            Arc::new(FakeBackend::unconfigured()),
            anthropic,
            Arc::new(FakeBackend::unconfigured()),
        );
        AgentService::new(
            Arc::new(router),
            MemoryService::new(MemorySettings::default()),
            ProjectIndexService::new(),
        )
    }

    async fn create_session(
        db: &sea_orm::DatabaseConnection,
        project_id: Uuid,
        prompt: &str,
    ) -> Session {
        Session::create(
            db,
            &CreateSession {
                project_id,
                prompt: prompt.to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn accepted_round_trip_completes_with_summary_and_changes() {
        let (db, project_id) = setup(ProjectSettings::default()).await;
        let agent = agent_with_replies(vec![
            Ok(INTENT_REPLY.to_string()),
            Ok(PATCH_REPLY.to_string()),
        ]);
        let session = create_session(&db, project_id, "add a greeting").await;

        let outcome = agent.process_session(&db, &session).await.unwrap();
        let AgentOutcome::PatchProposed(patch) = outcome else {
            panic!("expected a patch proposal");
        };
        assert_eq!(patch.summary, "Add greeting file");

        let reloaded = Session::find_by_id(&db, session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Completed);
        assert_eq!(reloaded.diff_summary.as_deref(), Some("Add greeting file"));
        assert_eq!(reloaded.scope.unwrap().files, vec!["src/hello.txt"]);
        // Assistant reply lands in the append-only log.
        assert_eq!(reloaded.messages.len(), 2);
        assert_eq!(reloaded.messages[1].role, MessageRole::Assistant);

        let changes = FileChange::find_by_session_id(&db, session.id).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file_path, "src/hello.txt");
        assert!(!changes[0].applied);
        assert!(changes[0].hunks.iter().all(|hunk| !hunk.approved));
    }

    #[tokio::test]
    async fn unparseable_intent_marks_the_session_failed() {
        let (db, project_id) = setup(ProjectSettings::default()).await;
        let agent = agent_with_replies(vec![Ok("sorry, I cannot do that".to_string())]);
        let session = create_session(&db, project_id, "add a greeting").await;

        let err = agent.process_session(&db, &session).await.unwrap_err();
        assert!(matches!(err, AgentError::IntentCreation(_)));

        let reloaded = Session::find_by_id(&db, session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn forbidden_scope_parks_the_session_until_approval() {
        let (db, project_id) = setup(ProjectSettings {
            forbidden_globs: vec!["secrets/".to_string()],
            ..Default::default()
        })
        .await;

        let intent = r#"{
            "goal": "rotate the key",
            "files": ["secrets/key.txt"],
            "budget": {"maxTokens": 1000, "maxCost": 0.5}
        }"#;
        let patch = r#"{
            "summary": "Rotate key",
            "files": [{
                "path": "secrets/key.txt",
                "changeType": "modify",
                "hunks": [{
                    "oldStart": 1, "oldLines": 1, "newStart": 1, "newLines": 1,
                    "content": "-old-key\n+new-key", "rationale": "rotation"
                }]
            }]
        }"#;
        let agent = agent_with_replies(vec![Ok(intent.to_string()), Ok(patch.to_string())]);
        let session = create_session(&db, project_id, "rotate the key").await;

        let outcome = agent.process_session(&db, &session).await.unwrap();
        let AgentOutcome::PermissionRequired { reason, .. } = outcome else {
            panic!("expected a permission request");
        };
        assert!(reason.contains("secrets/key.txt"));

        let parked = Session::find_by_id(&db, session.id).await.unwrap().unwrap();
        assert_eq!(parked.status, SessionStatus::PendingApproval);

        // Approval is final: the forbidden rule is not re-checked on resume.
        let scope = parked.scope.unwrap();
        ProjectFile::save(&db, project_id, "secrets/key.txt", "old-key\n")
            .await
            .unwrap();
        let outcome = agent
            .continue_session(&db, session.id, &scope)
            .await
            .unwrap();
        assert!(matches!(outcome, AgentOutcome::PatchProposed(_)));

        let resumed = Session::find_by_id(&db, session.id).await.unwrap().unwrap();
        assert_eq!(resumed.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn apply_all_is_idempotent_and_materializes_content() {
        let (db, project_id) = setup(ProjectSettings::default()).await;
        let agent = agent_with_replies(vec![
            Ok(INTENT_REPLY.to_string()),
            Ok(PATCH_REPLY.to_string()),
        ]);
        let session = create_session(&db, project_id, "add a greeting").await;
        agent.process_session(&db, &session).await.unwrap();

        agent.apply_hunks(&db, session.id, &[]).await.unwrap();
        let after_first = ProjectFile::get(&db, project_id, "src/hello.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after_first, "hello world\n");

        agent.apply_hunks(&db, session.id, &[]).await.unwrap();
        let after_second = ProjectFile::get(&db, project_id, "src/hello.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after_first, after_second);

        let changes = FileChange::find_by_session_id(&db, session.id).await.unwrap();
        assert!(changes[0].applied);
        assert!(changes[0].hunks.iter().all(|hunk| hunk.approved));
    }

    #[tokio::test]
    async fn selective_apply_leaves_unselected_hunks_unapproved() {
        let (db, project_id) = setup(ProjectSettings::default()).await;
        let patch = r#"{
            "summary": "Two edits",
            "files": [{
                "path": "notes.txt",
                "changeType": "modify",
                "hunks": [
                    {"oldStart": 1, "oldLines": 1, "newStart": 1, "newLines": 1,
                     "content": "-a\n+A", "rationale": "first"},
                    {"oldStart": 3, "oldLines": 1, "newStart": 3, "newLines": 1,
                     "content": "-c\n+C", "rationale": "second"}
                ]
            }]
        }"#;
        let intent = r#"{"goal": "edit notes", "files": ["notes.txt"],
            "budget": {"maxTokens": 1000, "maxCost": 0.5}}"#;
        let agent = agent_with_replies(vec![Ok(intent.to_string()), Ok(patch.to_string())]);

        ProjectFile::save(&db, project_id, "notes.txt", "a\nb\nc\n")
            .await
            .unwrap();
        let session = create_session(&db, project_id, "edit notes").await;
        agent.process_session(&db, &session).await.unwrap();

        let changes = FileChange::find_by_session_id(&db, session.id).await.unwrap();
        let first_hunk_id = changes[0].hunks[0].id.clone();

        agent
            .apply_hunks(&db, session.id, std::slice::from_ref(&first_hunk_id))
            .await
            .unwrap();

        let content = ProjectFile::get(&db, project_id, "notes.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content, "A\nb\nc\n");

        let changes = FileChange::find_by_session_id(&db, session.id).await.unwrap();
        assert!(changes[0].hunks[0].approved);
        assert!(!changes[0].hunks[1].approved);
    }

    #[tokio::test]
    async fn revert_restores_pre_image_bytes() {
        let (db, project_id) = setup(ProjectSettings::default()).await;
        let intent = r#"{"goal": "edit notes", "files": ["notes.txt"],
            "budget": {"maxTokens": 1000, "maxCost": 0.5}}"#;
        let patch = r#"{
            "summary": "Edit notes",
            "files": [{
                "path": "notes.txt",
                "changeType": "modify",
                "hunks": [{"oldStart": 1, "oldLines": 1, "newStart": 1, "newLines": 1,
                    "content": "-a\n+A", "rationale": "edit"}]
            }]
        }"#;
        let agent = agent_with_replies(vec![Ok(intent.to_string()), Ok(patch.to_string())]);

        ProjectFile::save(&db, project_id, "notes.txt", "a\nb\n")
            .await
            .unwrap();
        let session = create_session(&db, project_id, "edit notes").await;
        agent.process_session(&db, &session).await.unwrap();

        agent.apply_hunks(&db, session.id, &[]).await.unwrap();
        assert_eq!(
            ProjectFile::get(&db, project_id, "notes.txt").await.unwrap().unwrap(),
            "A\nb\n"
        );

        agent.revert_session(&db, session.id).await.unwrap();
        assert_eq!(
            ProjectFile::get(&db, project_id, "notes.txt").await.unwrap().unwrap(),
            "a\nb\n"
        );
        let changes = FileChange::find_by_session_id(&db, session.id).await.unwrap();
        assert!(!changes[0].applied);
    }

    #[test]
    fn json_replies_with_and_without_fences_parse() {
        let plain: RawScope = parse_json_reply(INTENT_REPLY).unwrap();
        assert_eq!(plain.goal, "add a greeting");

        let fenced: RawPatch = parse_json_reply(PATCH_REPLY).unwrap();
        assert_eq!(fenced.summary, "Add greeting file");
        assert_eq!(fenced.files[0].hunks.len(), 1);
    }
}
