#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::{TimeZone, Utc};
use mlp_manager::{
    ApiServer, AppState, ManualClock,
    config::{DeploymentPolicyConfig, NotebookPolicyConfig, SchedulerConfig, ServerConfig},
    services::{
        DeploymentService, ModelService, NotebookService,
        ReconciliationScheduler, ResourceLocks, UsageAccrualEngine,
    },
};
use mlp_models::{ModelDescriptor, ModelSpec, ModelStatus, ResourceRef, UsageRecord};
use mlp_runtime::InMemoryRuntime;
use mlp_storage::memory::{
    MemoryApiCallStorage, MemoryDeploymentStorage, MemoryModelStorage,
    MemoryNotebookStorage, MemoryUsageStorage,
};
use mlp_storage::{
    StorageError, StorageHealth, StorageResult, UsageFilter, UsageStorage,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

/// Usage store whose inserts can be switched off.
pub struct FlakyUsageStorage {
    inner: Arc<MemoryUsageStorage>,
    reject_inserts: AtomicBool,
}

impl FlakyUsageStorage {
    pub fn reject_inserts(&self, reject: bool) {
        self.reject_inserts.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageHealth for FlakyUsageStorage {
    async fn health(&self) -> StorageResult<()> {
        self.inner.health().await
    }
}

#[async_trait]
impl UsageStorage for FlakyUsageStorage {
    async fn insert_record(&self, record: &UsageRecord) -> StorageResult<()> {
        if self.reject_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("usage store unavailable".into()));
        }
        self.inner.insert_record(record).await
    }

    async fn open_records(&self, resource: &ResourceRef) -> StorageResult<Vec<UsageRecord>> {
        self.inner.open_records(resource).await
    }

    async fn update_open_record(&self, record: &UsageRecord) -> StorageResult<()> {
        self.inner.update_open_record(record).await
    }

    async fn list_records(&self, filter: UsageFilter) -> StorageResult<Vec<UsageRecord>> {
        self.inner.list_records(filter).await
    }
}

/// Services wired over in-memory stores, the in-memory runtime and a
/// manual clock. Stores stay reachable for direct inspection.
pub struct Harness {
    pub runtime: Arc<InMemoryRuntime>,
    pub clock: Arc<ManualClock>,
    pub locks: Arc<ResourceLocks>,
    pub notebook_store: Arc<MemoryNotebookStorage>,
    pub deployment_store: Arc<MemoryDeploymentStorage>,
    pub usage_store: Arc<MemoryUsageStorage>,
    pub usage_faults: Arc<FlakyUsageStorage>,
    pub api_call_store: Arc<MemoryApiCallStorage>,
    pub accrual: Arc<UsageAccrualEngine>,
    pub models: Arc<ModelService>,
    pub notebooks: Arc<NotebookService>,
    pub deployments: Arc<DeploymentService>,
    pub scheduler: Arc<ReconciliationScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(InMemoryRuntime::new(), DeploymentPolicyConfig::default())
    }

    pub fn with_runtime(runtime: InMemoryRuntime) -> Self {
        Self::build(runtime, DeploymentPolicyConfig::default())
    }

    pub fn with_predict_timeout(timeout: Duration) -> Self {
        Self::build(
            InMemoryRuntime::new(),
            DeploymentPolicyConfig {
                predict_timeout: timeout,
            },
        )
    }

    fn build(runtime: InMemoryRuntime, policy: DeploymentPolicyConfig) -> Self {
        let runtime = Arc::new(runtime);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap(),
        ));
        let locks = Arc::new(ResourceLocks::new());
        let notebook_store = Arc::new(MemoryNotebookStorage::new());
        let deployment_store = Arc::new(MemoryDeploymentStorage::new());
        let usage_store = Arc::new(MemoryUsageStorage::new());
        let api_call_store = Arc::new(MemoryApiCallStorage::new());
        let model_store = Arc::new(MemoryModelStorage::new());

        let usage_faults = Arc::new(FlakyUsageStorage {
            inner: usage_store.clone(),
            reject_inserts: AtomicBool::new(false),
        });

        let accrual = Arc::new(UsageAccrualEngine::new(usage_faults.clone()));
        let models = Arc::new(ModelService::new(model_store, clock.clone()));
        let notebooks = Arc::new(NotebookService::new(
            notebook_store.clone(),
            runtime.clone(),
            accrual.clone(),
            locks.clone(),
            clock.clone(),
            NotebookPolicyConfig::default(),
        ));
        let deployments = Arc::new(DeploymentService::new(
            deployment_store.clone(),
            api_call_store.clone(),
            models.clone(),
            runtime.clone(),
            accrual.clone(),
            locks.clone(),
            clock.clone(),
            policy,
        ));
        let scheduler = Arc::new(ReconciliationScheduler::new(
            notebooks.clone(),
            deployments.clone(),
            clock.clone(),
            SchedulerConfig::default(),
        ));

        Self {
            runtime,
            clock,
            locks,
            notebook_store,
            deployment_store,
            usage_store,
            usage_faults,
            api_call_store,
            accrual,
            models,
            notebooks,
            deployments,
            scheduler,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            notebook_service: self.notebooks.clone(),
            deployment_service: self.deployments.clone(),
            model_service: self.models.clone(),
            accrual: self.accrual.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn router(&self) -> Router {
        ApiServer::new(
            self.state(),
            ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                request_timeout: Duration::from_secs(30),
            },
        )
        .into_router()
    }

    pub fn minutes(&self, n: i64) {
        self.clock.advance(chrono::Duration::minutes(n));
    }

    pub async fn model(&self, owner: &str, status: ModelStatus) -> ModelDescriptor {
        self.models
            .register(
                owner,
                ModelSpec {
                    name: "iris-classifier".into(),
                    framework: "sklearn".into(),
                    framework_version: Some("1.4".into()),
                    artifact_path: "/srv/models/iris/model.pkl".into(),
                    requirements: vec!["pandas>=2.0".into()],
                    status,
                },
            )
            .await
            .unwrap()
    }

    pub async fn records_for(&self, resource: ResourceRef) -> Vec<UsageRecord> {
        self.usage_store
            .list_records(UsageFilter {
                resource: Some(resource),
                ..Default::default()
            })
            .await
            .unwrap()
    }
}
