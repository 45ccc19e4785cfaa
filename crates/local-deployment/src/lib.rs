use std::sync::Arc;

use async_trait::async_trait;
use db::{DBService, models::template::Template};
use deployment::{Deployment, DeploymentError};
use services::services::{
    agent::AgentService,
    config::{Config, load_config_from_file, save_config_to_file},
    events::EventService,
    git::GitService,
    index::ProjectIndexService,
    memory::MemoryService,
    model_router::ModelRouter,
};
use tokio::sync::RwLock;
use utils::{assets::config_path, msg_store::MsgStore};

/// Single-process wiring: SQLite-backed storage, HTTP model providers,
/// in-process event hub.
#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    agent: AgentService,
    git: GitService,
    memory: MemoryService,
    index: ProjectIndexService,
    model_router: Arc<ModelRouter>,
    events: EventService,
}

struct CoreServices {
    git: GitService,
    memory: MemoryService,
    index: ProjectIndexService,
    model_router: Arc<ModelRouter>,
    agent: AgentService,
}

struct RuntimeServices {
    db: DBService,
    events: EventService,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let config = Self::load_runtime_config().await?;
        let core = Self::build_core_services(&config).await;
        let runtime = Self::build_runtime_services().await?;

        let CoreServices {
            git,
            memory,
            index,
            model_router,
            agent,
        } = core;
        let RuntimeServices { db, events } = runtime;

        Ok(Self {
            config,
            db,
            agent,
            git,
            memory,
            index,
            model_router,
            events,
        })
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn agent(&self) -> &AgentService {
        &self.agent
    }

    fn git(&self) -> &GitService {
        &self.git
    }

    fn memory(&self) -> &MemoryService {
        &self.memory
    }

    fn index(&self) -> &ProjectIndexService {
        &self.index
    }

    fn model_router(&self) -> &Arc<ModelRouter> {
        &self.model_router
    }

    fn events(&self) -> &EventService {
        &self.events
    }
}

impl LocalDeployment {
    async fn load_runtime_config() -> Result<Arc<RwLock<Config>>, DeploymentError> {
        let raw_config = load_config_from_file(&config_path()).await;
        save_config_to_file(&raw_config, &config_path()).await?;
        Ok(Arc::new(RwLock::new(raw_config)))
    }

    async fn build_core_services(config: &Arc<RwLock<Config>>) -> CoreServices {
        let snapshot = config.read().await.clone();
        let git = GitService::new(snapshot.git.clone());
        let memory = MemoryService::new(snapshot.memory.clone());
        let index = ProjectIndexService::new();
        let model_router = Arc::new(ModelRouter::with_default_backends(&snapshot.model));
        let agent = AgentService::new(model_router.clone(), memory.clone(), index.clone());

        CoreServices {
            git,
            memory,
            index,
            model_router,
            agent,
        }
    }

    async fn build_runtime_services() -> Result<RuntimeServices, DeploymentError> {
        let db = DBService::new().await?;
        Self::seed_templates(&db).await?;
        let events = EventService::new(db.clone(), Arc::new(MsgStore::new()));
        Ok(RuntimeServices { db, events })
    }

    async fn seed_templates(db: &DBService) -> Result<(), DeploymentError> {
        if Template::count(&db.pool).await? == 0 {
            let seeded = Template::seed_defaults(&db.pool).await?;
            tracing::info!(count = seeded, "Seeded starter templates");
        }
        Ok(())
    }
}
