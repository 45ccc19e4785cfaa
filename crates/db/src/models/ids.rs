use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{project, session};

pub async fn project_row_id<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
) -> Result<Option<i64>, DbErr> {
    let record = project::Entity::find()
        .filter(project::Column::Uuid.eq(project_id))
        .one(db)
        .await?;
    Ok(record.map(|model| model.id))
}

pub async fn project_uuid_by_row_id<C: ConnectionTrait>(
    db: &C,
    row_id: i64,
) -> Result<Option<Uuid>, DbErr> {
    let record = project::Entity::find_by_id(row_id).one(db).await?;
    Ok(record.map(|model| model.uuid))
}

pub async fn session_row_id<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
) -> Result<Option<i64>, DbErr> {
    let record = session::Entity::find()
        .filter(session::Column::Uuid.eq(session_id))
        .one(db)
        .await?;
    Ok(record.map(|model| model.id))
}
