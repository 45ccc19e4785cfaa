use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::event_outbox;

/// Transactional outbox: mutations enqueue in the same connection, the
/// event service publishes asynchronously.
pub struct EventOutbox;

impl EventOutbox {
    pub async fn enqueue<C: ConnectionTrait>(
        db: &C,
        event_type: &str,
        entity_type: &str,
        entity_id: Uuid,
        payload: Value,
    ) -> Result<(), DbErr> {
        let active = event_outbox::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            event_type: Set(event_type.to_string()),
            entity_type: Set(entity_type.to_string()),
            entity_id: Set(entity_id),
            payload: Set(payload),
            created_at: Set(Utc::now()),
            published_at: Set(None),
            attempts: Set(0),
            last_error: Set(None),
            ..Default::default()
        };

        active.insert(db).await?;
        Ok(())
    }

    pub async fn fetch_unpublished<C: ConnectionTrait>(
        db: &C,
        limit: u64,
    ) -> Result<Vec<event_outbox::Model>, DbErr> {
        event_outbox::Entity::find()
            .filter(event_outbox::Column::PublishedAt.is_null())
            .order_by_asc(event_outbox::Column::CreatedAt)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn mark_published<C: ConnectionTrait>(db: &C, id: i64) -> Result<(), DbErr> {
        let record = event_outbox::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or(DbErr::RecordNotFound(
                "Event outbox record not found".to_string(),
            ))?;

        let mut active: event_outbox::ActiveModel = record.into();
        active.published_at = Set(Some(Utc::now()));
        active.update(db).await?;
        Ok(())
    }

    pub async fn mark_failed<C: ConnectionTrait>(
        db: &C,
        id: i64,
        error: &str,
    ) -> Result<(), DbErr> {
        let record = event_outbox::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or(DbErr::RecordNotFound(
                "Event outbox record not found".to_string(),
            ))?;

        let attempts = record.attempts + 1;
        let mut active: event_outbox::ActiveModel = record.into();
        active.attempts = Set(attempts);
        active.last_error = Set(Some(error.to_string()));
        active.update(db).await?;
        Ok(())
    }

    /// Retention: published rows older than the cutoff are deleted.
    pub async fn prune_published_before<C: ConnectionTrait>(
        db: &C,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = event_outbox::Entity::delete_many()
            .filter(event_outbox::Column::PublishedAt.is_not_null())
            .filter(event_outbox::Column::PublishedAt.lt(cutoff))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
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
    async fn publish_and_failure_bookkeeping() {
        let db = setup_db().await;

        EventOutbox::enqueue(&db, "a.created", "a", Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();
        EventOutbox::enqueue(&db, "b.created", "b", Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let entries = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        assert_eq!(entries.len(), 2);

        EventOutbox::mark_published(&db, entries[0].id).await.unwrap();
        EventOutbox::mark_failed(&db, entries[1].id, "boom").await.unwrap();

        let remaining = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attempts, 1);
        assert_eq!(remaining[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn prune_only_removes_published_rows() {
        let db = setup_db().await;

        EventOutbox::enqueue(&db, "a.created", "a", Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();
        EventOutbox::enqueue(&db, "b.created", "b", Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let entries = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        EventOutbox::mark_published(&db, entries[0].id).await.unwrap();

        let removed = EventOutbox::prune_published_before(&db, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(EventOutbox::fetch_unpublished(&db, 10).await.unwrap().len(), 1);
    }
}
