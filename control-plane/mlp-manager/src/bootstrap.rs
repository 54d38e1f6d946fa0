use anyhow::Result;
use mlp_runtime::{DockerRuntime, InMemoryRuntime, RuntimeGateway};
use mlp_storage::StorageFactory;
use std::sync::Arc;
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    config::{AppConfig, RuntimeType, SchedulerConfig, ServerConfig},
    server::{ApiServer, AppState},
    services::{
        DeploymentService, ModelService, NotebookService,
        ReconciliationScheduler, ResourceLocks, UsageAccrualEngine,
    },
    storage::create_storage_factory,
};

/// Fully wired services sharing one runtime, one clock and one lock table.
pub struct Components {
    pub state: AppState,
    pub scheduler: Arc<ReconciliationScheduler>,
    pub scheduler_config: SchedulerConfig,
    pub server_config: ServerConfig,
}

impl Components {
    pub fn api_server(&self) -> ApiServer {
        ApiServer::new(self.state.clone(), self.server_config.clone())
    }
}

pub fn create_runtime(config: &AppConfig) -> Result<Arc<dyn RuntimeGateway>> {
    let runtime_config = config.runtime();
    Ok(match runtime_config.runtime_type {
        RuntimeType::Docker => {
            info!(url = %runtime_config.docker.url, "using docker runtime");
            Arc::new(DockerRuntime::new(runtime_config.docker)?)
        }
        RuntimeType::Memory => {
            info!("using in-memory runtime");
            Arc::new(InMemoryRuntime::new())
        }
    })
}

/// Wire every service around the given runtime and clock.
pub async fn build_components_with(
    config: &AppConfig,
    runtime: Arc<dyn RuntimeGateway>,
    clock: Arc<dyn Clock>,
) -> Result<Components> {
    let storage_factory = create_storage_factory(&config.storage()).await?;
    let notebook_storage = Arc::new(storage_factory.create_notebook_storage());
    let deployment_storage =
        Arc::new(storage_factory.create_deployment_storage());
    let usage_storage = Arc::new(storage_factory.create_usage_storage());
    let api_call_storage = Arc::new(storage_factory.create_api_call_storage());
    let model_storage = Arc::new(storage_factory.create_model_storage());

    let locks = Arc::new(ResourceLocks::new());
    let accrual = Arc::new(UsageAccrualEngine::new(usage_storage));
    let model_service = Arc::new(ModelService::new(model_storage, clock.clone()));

    let notebook_service = Arc::new(NotebookService::new(
        notebook_storage,
        runtime.clone(),
        accrual.clone(),
        locks.clone(),
        clock.clone(),
        config.notebook_policy(),
    ));

    let deployment_service = Arc::new(DeploymentService::new(
        deployment_storage,
        api_call_storage,
        model_service.clone(),
        runtime,
        accrual.clone(),
        locks,
        clock.clone(),
        config.deployment_policy(),
    ));

    let scheduler_config = config.scheduler();
    let scheduler = Arc::new(ReconciliationScheduler::new(
        notebook_service.clone(),
        deployment_service.clone(),
        clock.clone(),
        scheduler_config.clone(),
    ));

    Ok(Components {
        state: AppState {
            notebook_service,
            deployment_service,
            model_service,
            accrual,
            clock,
        },
        scheduler,
        scheduler_config,
        server_config: config.server(),
    })
}

pub async fn build_components(config: &AppConfig) -> Result<Components> {
    let runtime = create_runtime(config)?;
    build_components_with(config, runtime, Arc::new(SystemClock)).await
}

/// Build a fully-wired ApiServer from environment variables.
/// Mirrors the logic in bin/main and is useful for tests and embedding.
pub async fn build_api_server_from_env() -> Result<ApiServer> {
    let config = AppConfig::load_from_env()?;
    let components = build_components(&config).await?;
    Ok(components.api_server())
}
