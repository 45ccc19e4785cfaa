use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(Projects::Table)
                    .col(pk_id_col(manager, Projects::Id))
                    .col(uuid_col(Projects::Uuid))
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(ColumnDef::new(Projects::RepoUrl).string())
                    .col(
                        ColumnDef::new(Projects::DefaultBranch)
                            .string()
                            .not_null()
                            .default(Expr::val("main")),
                    )
                    .col(json_col(Projects::Settings))
                    .col(timestamp_col(Projects::CreatedAt))
                    .col(timestamp_col(Projects::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_projects_uuid")
                    .table(Projects::Table)
                    .col(Projects::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(Sessions::Table)
                    .col(pk_id_col(manager, Sessions::Id))
                    .col(uuid_col(Sessions::Uuid))
                    .col(ColumnDef::new(Sessions::ProjectId).big_integer().not_null())
                    .col(ColumnDef::new(Sessions::Prompt).text().not_null())
                    .col(json_col(Sessions::Messages))
                    .col(ColumnDef::new(Sessions::Scope).json())
                    .col(ColumnDef::new(Sessions::DiffSummary).text())
                    .col(
                        ColumnDef::new(Sessions::Status)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("active")),
                    )
                    .col(timestamp_col(Sessions::CreatedAt))
                    .col(timestamp_col(Sessions::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sessions_project_id")
                            .from(Sessions::Table, Sessions::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_uuid")
                    .table(Sessions::Table)
                    .col(Sessions::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_project_id")
                    .table(Sessions::Table)
                    .col(Sessions::ProjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(FileChanges::Table)
                    .col(pk_id_col(manager, FileChanges::Id))
                    .col(uuid_col(FileChanges::Uuid))
                    .col(
                        ColumnDef::new(FileChanges::SessionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FileChanges::FilePath).string().not_null())
                    .col(
                        ColumnDef::new(FileChanges::ChangeType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(json_col(FileChanges::Hunks))
                    .col(
                        ColumnDef::new(FileChanges::Applied)
                            .boolean()
                            .not_null()
                            .default(Expr::val(false)),
                    )
                    .col(ColumnDef::new(FileChanges::PreImage).text())
                    .col(timestamp_col(FileChanges::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_file_changes_session_id")
                            .from(FileChanges::Table, FileChanges::SessionId)
                            .to(Sessions::Table, Sessions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_file_changes_uuid")
                    .table(FileChanges::Table)
                    .col(FileChanges::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_file_changes_session_id")
                    .table(FileChanges::Table)
                    .col(FileChanges::SessionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(MemoryNotes::Table)
                    .col(pk_id_col(manager, MemoryNotes::Id))
                    .col(uuid_col(MemoryNotes::Uuid))
                    .col(
                        ColumnDef::new(MemoryNotes::ProjectId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MemoryNotes::Content).text().not_null())
                    .col(json_col(MemoryNotes::Tags))
                    .col(json_col(MemoryNotes::Links))
                    .col(timestamp_col(MemoryNotes::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_memory_notes_project_id")
                            .from(MemoryNotes::Table, MemoryNotes::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_memory_notes_project_id")
                    .table(MemoryNotes::Table)
                    .col(MemoryNotes::ProjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(GitStates::Table)
                    .col(pk_id_col(manager, GitStates::Id))
                    .col(
                        ColumnDef::new(GitStates::ProjectId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GitStates::Branch)
                            .string()
                            .not_null()
                            .default(Expr::val("main")),
                    )
                    .col(
                        ColumnDef::new(GitStates::Ahead)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(
                        ColumnDef::new(GitStates::Behind)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(ColumnDef::new(GitStates::LastCommit).string())
                    .col(timestamp_col(GitStates::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_git_states_project_id")
                            .from(GitStates::Table, GitStates::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_git_states_project_id")
                    .table(GitStates::Table)
                    .col(GitStates::ProjectId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(Templates::Table)
                    .col(pk_id_col(manager, Templates::Id))
                    .col(uuid_col(Templates::Uuid))
                    .col(ColumnDef::new(Templates::Name).string().not_null())
                    .col(ColumnDef::new(Templates::Description).text().not_null())
                    .col(ColumnDef::new(Templates::Category).string().not_null())
                    .col(json_col(Templates::Tags))
                    .col(ColumnDef::new(Templates::Author).string().not_null())
                    .col(
                        ColumnDef::new(Templates::Downloads)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(
                        ColumnDef::new(Templates::Stars)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(json_col(Templates::Files))
                    .col(json_col(Templates::Dependencies))
                    .col(timestamp_col(Templates::CreatedAt))
                    .col(timestamp_col(Templates::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_templates_uuid")
                    .table(Templates::Table)
                    .col(Templates::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(ProjectFiles::Table)
                    .col(pk_id_col(manager, ProjectFiles::Id))
                    .col(
                        ColumnDef::new(ProjectFiles::ProjectId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProjectFiles::Path).string().not_null())
                    .col(ColumnDef::new(ProjectFiles::Content).text().not_null())
                    .col(timestamp_col(ProjectFiles::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_files_project_id")
                            .from(ProjectFiles::Table, ProjectFiles::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_project_files_project_id_path")
                    .table(ProjectFiles::Table)
                    .col(ProjectFiles::ProjectId)
                    .col(ProjectFiles::Path)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(EventOutbox::Table)
                    .col(pk_id_col(manager, EventOutbox::Id))
                    .col(uuid_col(EventOutbox::Uuid))
                    .col(ColumnDef::new(EventOutbox::EventType).string().not_null())
                    .col(ColumnDef::new(EventOutbox::EntityType).string().not_null())
                    .col(uuid_col(EventOutbox::EntityId))
                    .col(json_col(EventOutbox::Payload))
                    .col(timestamp_col(EventOutbox::CreatedAt))
                    .col(ColumnDef::new(EventOutbox::PublishedAt).timestamp())
                    .col(
                        ColumnDef::new(EventOutbox::Attempts)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(ColumnDef::new(EventOutbox::LastError).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_event_outbox_published_at")
                    .table(EventOutbox::Table)
                    .col(EventOutbox::PublishedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EventOutbox::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProjectFiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Templates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GitStates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MemoryNotes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FileChanges::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn pk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().auto_increment().primary_key().to_owned()
}

fn uuid_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().not_null().to_owned()
}

fn json_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).json().not_null().to_owned()
}

fn timestamp_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    Uuid,
    Name,
    RepoUrl,
    DefaultBranch,
    Settings,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    Id,
    Uuid,
    ProjectId,
    Prompt,
    Messages,
    Scope,
    DiffSummary,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum FileChanges {
    Table,
    Id,
    Uuid,
    SessionId,
    FilePath,
    ChangeType,
    Hunks,
    Applied,
    PreImage,
    CreatedAt,
}

#[derive(DeriveIden)]
enum MemoryNotes {
    Table,
    Id,
    Uuid,
    ProjectId,
    Content,
    Tags,
    Links,
    CreatedAt,
}

#[derive(DeriveIden)]
enum GitStates {
    Table,
    Id,
    ProjectId,
    Branch,
    Ahead,
    Behind,
    LastCommit,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Templates {
    Table,
    Id,
    Uuid,
    Name,
    Description,
    Category,
    Tags,
    Author,
    Downloads,
    Stars,
    Files,
    Dependencies,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ProjectFiles {
    Table,
    Id,
    ProjectId,
    Path,
    Content,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum EventOutbox {
    Table,
    Id,
    Uuid,
    EventType,
    EntityType,
    EntityId,
    Payload,
    CreatedAt,
    PublishedAt,
    Attempts,
    LastError,
}
