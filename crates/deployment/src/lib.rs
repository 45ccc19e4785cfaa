use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use services::services::{
    agent::AgentService,
    config::{Config, ConfigError},
    events::EventService,
    git::GitService,
    index::ProjectIndexService,
    memory::MemoryService,
    model_router::ModelRouter,
};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Database(#[from] db::DbErr),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Service locator the HTTP layer runs against. Handlers depend on this
/// trait, never on concrete service wiring.
#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<RwLock<Config>>;
    fn db(&self) -> &DBService;
    fn agent(&self) -> &AgentService;
    fn git(&self) -> &GitService;
    fn memory(&self) -> &MemoryService;
    fn index(&self) -> &ProjectIndexService;
    fn model_router(&self) -> &Arc<ModelRouter>;
    fn events(&self) -> &EventService;
}
