use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::entities::template;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Template not found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct TemplateFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author: String,
    pub downloads: i32,
    pub stars: i32,
    pub files: Vec<TemplateFile>,
    pub dependencies: Vec<String>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author: String,
    pub files: Vec<TemplateFile>,
    pub dependencies: Vec<String>,
}

impl Template {
    fn from_model(model: template::Model) -> Self {
        Self {
            id: model.uuid,
            name: model.name,
            description: model.description,
            category: model.category,
            tags: serde_json::from_value(model.tags).unwrap_or_default(),
            author: model.author,
            downloads: model.downloads,
            stars: model.stars,
            files: serde_json::from_value(model.files).unwrap_or_default(),
            dependencies: serde_json::from_value(model.dependencies).unwrap_or_default(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub async fn count<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
        template::Entity::find().count(db).await
    }

    /// `category` filters exactly (unless "all"); `search` matches name,
    /// description, or any tag, case-insensitively.
    pub async fn find_all<C: ConnectionTrait>(
        db: &C,
        category: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = template::Entity::find().order_by_desc(template::Column::Downloads);
        if let Some(category) = category
            && category != "all"
        {
            query = query.filter(template::Column::Category.eq(category));
        }

        let templates = query
            .all(db)
            .await?
            .into_iter()
            .map(Self::from_model);

        let Some(search) = search.map(str::to_lowercase).filter(|s| !s.is_empty()) else {
            return Ok(templates.collect());
        };

        Ok(templates
            .filter(|t| {
                t.name.to_lowercase().contains(&search)
                    || t.description.to_lowercase().contains(&search)
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&search))
            })
            .collect())
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = template::Entity::find()
            .filter(template::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateTemplate,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let active = template::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            name: Set(data.name.clone()),
            description: Set(data.description.clone()),
            category: Set(data.category.clone()),
            tags: Set(serde_json::to_value(&data.tags)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            author: Set(data.author.clone()),
            downloads: Set(0),
            stars: Set(0),
            files: Set(serde_json::to_value(&data.files)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            dependencies: Set(serde_json::to_value(&data.dependencies)
                .map_err(|err| DbErr::Custom(err.to_string()))?),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    pub async fn increment_downloads<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<(), TemplateError> {
        let record = template::Entity::find()
            .filter(template::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(TemplateError::NotFound)?;

        let downloads = record.downloads + 1;
        let mut active: template::ActiveModel = record.into();
        active.downloads = Set(downloads);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    /// Starter catalogue, inserted once on an empty table.
    pub async fn seed_defaults<C: ConnectionTrait>(db: &C) -> Result<usize, DbErr> {
        let defaults = vec![
            CreateTemplate {
                name: "Static Landing Page".to_string(),
                description: "A single-page HTML/CSS starting point with no build step"
                    .to_string(),
                category: "web".to_string(),
                tags: vec!["html".to_string(), "css".to_string()],
                author: "Reme Team".to_string(),
                files: vec![
                    TemplateFile {
                        path: "index.html".to_string(),
                        content: "<!DOCTYPE html>\n<html>\n<head><title>New Project</title><link rel=\"stylesheet\" href=\"styles.css\"></head>\n<body><h1>Hello</h1></body>\n</html>\n".to_string(),
                    },
                    TemplateFile {
                        path: "styles.css".to_string(),
                        content: "body { font-family: sans-serif; margin: 2rem; }\n".to_string(),
                    },
                ],
                dependencies: vec![],
            },
            CreateTemplate {
                name: "Node Script".to_string(),
                description: "A minimal Node.js project with a single entry point".to_string(),
                category: "api".to_string(),
                tags: vec!["node".to_string(), "javascript".to_string()],
                author: "Reme Team".to_string(),
                files: vec![
                    TemplateFile {
                        path: "index.js".to_string(),
                        content: "console.log('Hello from Reme!');\n".to_string(),
                    },
                    TemplateFile {
                        path: "package.json".to_string(),
                        content: "{\n  \"name\": \"new-project\",\n  \"version\": \"1.0.0\",\n  \"main\": \"index.js\"\n}\n".to_string(),
                    },
                ],
                dependencies: vec!["node".to_string()],
            },
        ];

        let count = defaults.len();
        for data in &defaults {
            Self::create(db, data).await?;
        }
        Ok(count)
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
    async fn seeded_templates_filter_by_category_and_search() {
        let db = setup_db().await;
        let seeded = Template::seed_defaults(&db).await.unwrap();
        assert_eq!(seeded as u64, Template::count(&db).await.unwrap());

        let web = Template::find_all(&db, Some("web"), None).await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].category, "web");

        let all = Template::find_all(&db, Some("all"), None).await.unwrap();
        assert_eq!(all.len(), seeded);

        let by_tag = Template::find_all(&db, None, Some("node")).await.unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].name, "Node Script");
    }

    #[tokio::test]
    async fn increment_downloads_bumps_counter() {
        let db = setup_db().await;
        Template::seed_defaults(&db).await.unwrap();
        let template = &Template::find_all(&db, None, None).await.unwrap()[0];

        Template::increment_downloads(&db, template.id).await.unwrap();
        let reloaded = Template::find_by_id(&db, template.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.downloads, template.downloads + 1);
    }
}
