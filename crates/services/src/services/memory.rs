use std::collections::HashMap;

use chrono::Utc;
use db::models::{
    file_change::FileChange,
    memory_note::{CreateMemoryNote, MemoryNote, MemoryNoteError},
    session::{Session, SessionError},
};
use sea_orm::ConnectionTrait;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use super::config::MemorySettings;

/// Scoring weights for warm retrieval: term hits dominate, recency breaks
/// ties between equally relevant notes.
const CONTENT_HIT_SCORE: i64 = 10;
const TAG_HIT_SCORE: i64 = 5;
const RECENCY_WEIGHT: i64 = 1;

/// Notes newer than this (days) count as warm; older ones are cold until
/// explicitly requested.
const WARM_WINDOW_DAYS: i64 = 60;

const HOT_PROMPT_NOTES: usize = 3;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Note(#[from] MemoryNoteError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    FileChange(#[from] db::models::file_change::FileChangeError),
    #[error("Session not found")]
    SessionNotFound,
}

/// Full history for one session, loaded on demand only.
#[derive(Debug, Clone, Serialize, TS)]
pub struct ColdMemory {
    pub session: Session,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct MemoryStats {
    pub total_notes: u64,
    pub hot_count: usize,
    pub warm_count: usize,
    pub cold_count: usize,
    pub most_used_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub include_hot: bool,
    pub include_warm: bool,
    pub max_results: usize,
}

/// Recency/relevance tiers over a project's notes. Tiering is query-time
/// classification, never a stored field.
#[derive(Clone)]
pub struct MemoryService {
    settings: MemorySettings,
}

impl MemoryService {
    pub fn new(settings: MemorySettings) -> Self {
        Self { settings }
    }

    /// Hot tier: the most recent notes, always included in prompt bundles.
    pub async fn hot<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<MemoryNote>, MemoryError> {
        Ok(MemoryNote::find_recent_by_project(db, project_id, self.settings.hot_limit).await?)
    }

    /// The slice of hot memory worth spending prompt tokens on.
    pub async fn hot_for_prompt<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<MemoryNote>, MemoryError> {
        let mut notes = self.hot(db, project_id).await?;
        notes.truncate(HOT_PROMPT_NOTES);
        Ok(notes)
    }

    /// Warm tier: keyword-scored retrieval against the query.
    pub async fn warm<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
        query: &str,
    ) -> Result<Vec<MemoryNote>, MemoryError> {
        let notes = MemoryNote::search(db, project_id, "").await?;
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(i64, MemoryNote)> = notes
            .into_iter()
            .enumerate()
            .filter_map(|(index, note)| {
                let content = note.content.to_lowercase();
                let mut score = 0i64;
                for term in &terms {
                    if content.contains(term.as_str()) {
                        score += CONTENT_HIT_SCORE;
                    }
                    if note
                        .tags
                        .iter()
                        .any(|tag| tag.to_lowercase().contains(term.as_str()))
                    {
                        score += TAG_HIT_SCORE;
                    }
                }
                if score == 0 {
                    return None;
                }
                // Notes arrive newest first; earlier index = fresher note.
                let recency_bonus = (100 - index.min(99) as i64) * RECENCY_WEIGHT;
                Some((score * 100 + recency_bonus, note))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(self.settings.warm_limit)
            .map(|(_, note)| note)
            .collect())
    }

    /// Cold tier: the complete record of one session.
    pub async fn cold<C: ConnectionTrait>(
        &self,
        db: &C,
        session_id: Uuid,
    ) -> Result<ColdMemory, MemoryError> {
        let session = Session::find_by_id(db, session_id)
            .await?
            .ok_or(MemoryError::SessionNotFound)?;
        let changes = FileChange::find_by_session_id(db, session_id).await?;
        Ok(ColdMemory { session, changes })
    }

    /// Distills a finished session into a note linked back to it.
    pub async fn add_session_note<C: ConnectionTrait>(
        &self,
        db: &C,
        session_id: Uuid,
        summary: &str,
        extra_tags: Vec<String>,
    ) -> Result<MemoryNote, MemoryError> {
        let session = Session::find_by_id(db, session_id)
            .await?
            .ok_or(MemoryError::SessionNotFound)?;

        let mut tags = vec!["session".to_string()];
        tags.extend(extra_tags);

        Ok(MemoryNote::create(
            db,
            session.project_id,
            &CreateMemoryNote {
                content: format!("Session {session_id}: {summary}"),
                tags,
                links: vec![session_id.to_string()],
            },
        )
        .await?)
    }

    /// Merged hot + warm view, deduplicated by note id.
    pub async fn search<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<MemoryNote>, MemoryError> {
        let mut results: Vec<MemoryNote> = Vec::new();

        if options.include_hot {
            results.extend(self.hot(db, project_id).await?);
        }
        if options.include_warm {
            results.extend(self.warm(db, project_id, query).await?);
        }

        let mut seen = std::collections::HashSet::new();
        results.retain(|note| seen.insert(note.id));

        let cap = if options.max_results == 0 {
            10
        } else {
            options.max_results
        };
        results.truncate(cap);
        Ok(results)
    }

    pub async fn stats<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
    ) -> Result<MemoryStats, MemoryError> {
        let total = MemoryNote::count_by_project(db, project_id).await?;
        let notes = MemoryNote::search(db, project_id, "").await?;

        let hot_count = (self.settings.hot_limit as usize).min(notes.len());
        let warm_cutoff = Utc::now() - chrono::Duration::days(WARM_WINDOW_DAYS);
        let warm_count = notes
            .iter()
            .skip(hot_count)
            .filter(|note| note.created_at >= warm_cutoff)
            .count();
        let cold_count = notes.len() - hot_count - warm_count;

        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        for note in &notes {
            for tag in &note.tags {
                *tag_counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut tags: Vec<(&str, usize)> = tag_counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        Ok(MemoryStats {
            total_notes: total,
            hot_count,
            warm_count,
            cold_count,
            most_used_tags: tags.into_iter().take(5).map(|(tag, _)| tag.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use db::models::project::{CreateProject, Project};
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;

    async fn setup() -> (sea_orm::DatabaseConnection, Uuid, MemoryService) {
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
        (db, project_id, MemoryService::new(MemorySettings::default()))
    }

    async fn note(db: &sea_orm::DatabaseConnection, project_id: Uuid, content: &str, tags: &[&str]) {
        MemoryNote::create(
            db,
            project_id,
            &CreateMemoryNote {
                content: content.to_string(),
                tags: tags.iter().map(|s| s.to_string()).collect(),
                links: vec![],
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn warm_ranks_by_term_hits_before_recency() {
        let (db, project_id, memory) = setup().await;
        note(&db, project_id, "refactored the auth token flow", &["auth"]).await;
        note(&db, project_id, "tweaked dashboard colors", &["ui"]).await;
        note(&db, project_id, "auth bug in token refresh", &["auth", "bug"]).await;

        let warm = memory.warm(&db, project_id, "auth token").await.unwrap();
        assert_eq!(warm.len(), 2);
        assert!(warm[0].content.contains("auth"));
        assert!(warm.iter().all(|n| !n.content.contains("dashboard")));
    }

    #[tokio::test]
    async fn warm_with_no_query_terms_returns_nothing() {
        let (db, project_id, memory) = setup().await;
        note(&db, project_id, "anything", &[]).await;

        let warm = memory.warm(&db, project_id, "   ").await.unwrap();
        assert!(warm.is_empty());
    }

    #[tokio::test]
    async fn hot_for_prompt_caps_at_three_notes() {
        let (db, project_id, memory) = setup().await;
        for i in 0..5 {
            note(&db, project_id, &format!("note {i}"), &[]).await;
        }

        let hot = memory.hot_for_prompt(&db, project_id).await.unwrap();
        assert_eq!(hot.len(), 3);
    }

    #[tokio::test]
    async fn search_merges_and_dedups_tiers() {
        let (db, project_id, memory) = setup().await;
        note(&db, project_id, "auth work landed", &["auth"]).await;

        let results = memory
            .search(
                &db,
                project_id,
                "auth",
                SearchOptions {
                    include_hot: true,
                    include_warm: true,
                    max_results: 10,
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn stats_counts_tiers_and_tags() {
        let (db, project_id, memory) = setup().await;
        for i in 0..7 {
            note(&db, project_id, &format!("note {i}"), &["auth"]).await;
        }

        let stats = memory.stats(&db, project_id).await.unwrap();
        assert_eq!(stats.total_notes, 7);
        assert_eq!(stats.hot_count, 5);
        assert_eq!(stats.warm_count, 2);
        assert_eq!(stats.cold_count, 0);
        assert_eq!(stats.most_used_tags, vec!["auth".to_string()]);
    }
}
