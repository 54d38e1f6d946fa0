use crate::error::StorageError;
use crate::traits::*;
use async_trait::async_trait;
use mlp_models::{
    ApiCall, Deployment, DeploymentStatus, ModelDescriptor, Notebook,
    NotebookStatus, ResourceRef, UsageRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type MemoryStore<T> = Arc<RwLock<HashMap<String, T>>>;

fn new_store<T>() -> MemoryStore<T> {
    Arc::new(RwLock::new(HashMap::new()))
}

#[derive(Clone, Default)]
pub struct MemoryNotebookStorage {
    store: MemoryStore<Notebook>,
}

#[derive(Clone, Default)]
pub struct MemoryDeploymentStorage {
    store: MemoryStore<Deployment>,
}

#[derive(Clone, Default)]
pub struct MemoryUsageStorage {
    store: MemoryStore<UsageRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryApiCallStorage {
    calls: Arc<RwLock<Vec<ApiCall>>>,
}

#[derive(Clone, Default)]
pub struct MemoryModelStorage {
    store: MemoryStore<ModelDescriptor>,
}

impl MemoryNotebookStorage {
    pub fn new() -> Self {
        Self { store: new_store() }
    }
}

impl MemoryDeploymentStorage {
    pub fn new() -> Self {
        Self { store: new_store() }
    }
}

impl MemoryUsageStorage {
    pub fn new() -> Self {
        Self { store: new_store() }
    }
}

impl MemoryApiCallStorage {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl MemoryModelStorage {
    pub fn new() -> Self {
        Self { store: new_store() }
    }
}

macro_rules! memory_health {
    ($($ty:ty),*) => {
        $(
            #[async_trait]
            impl StorageHealth for $ty {
                async fn health(&self) -> StorageResult<()> {
                    Ok(())
                }
            }
        )*
    };
}

memory_health!(
    MemoryNotebookStorage,
    MemoryDeploymentStorage,
    MemoryUsageStorage,
    MemoryApiCallStorage,
    MemoryModelStorage
);

#[async_trait]
impl NotebookStorage for MemoryNotebookStorage {
    async fn insert_notebook(&self, notebook: &Notebook) -> StorageResult<()> {
        let mut store = self.store.write().await;
        if store.contains_key(&notebook.id) {
            return Err(StorageError::AlreadyExists(notebook.id.clone()));
        }
        store.insert(notebook.id.clone(), notebook.clone());
        Ok(())
    }

    async fn get_notebook(&self, id: &str) -> StorageResult<Option<Notebook>> {
        let store = self.store.read().await;
        Ok(store.get(id).cloned())
    }

    async fn list_notebooks(
        &self,
        filter: NotebookFilter,
    ) -> StorageResult<Vec<Notebook>> {
        let store = self.store.read().await;
        let mut notebooks: Vec<Notebook> = store
            .values()
            .filter(|nb| filter.matches(nb))
            .cloned()
            .collect();
        notebooks.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        Ok(notebooks)
    }

    async fn update_notebook(
        &self,
        notebook: &Notebook,
        expected: NotebookStatus,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        let current = store
            .get_mut(&notebook.id)
            .ok_or_else(|| StorageError::NotFound(notebook.id.clone()))?;
        if current.status != expected {
            return Err(StorageError::Conflict(format!(
                "notebook {} is {}, expected {}",
                notebook.id, current.status, expected
            )));
        }
        *current = notebook.clone();
        Ok(())
    }
}

#[async_trait]
impl DeploymentStorage for MemoryDeploymentStorage {
    async fn insert_deployment(
        &self,
        deployment: &Deployment,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        if store.contains_key(&deployment.id) {
            return Err(StorageError::AlreadyExists(deployment.id.clone()));
        }
        if store
            .values()
            .any(|d| d.endpoint_path == deployment.endpoint_path)
        {
            return Err(StorageError::AlreadyExists(
                deployment.endpoint_path.clone(),
            ));
        }
        store.insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_deployment(
        &self,
        id: &str,
    ) -> StorageResult<Option<Deployment>> {
        let store = self.store.read().await;
        Ok(store.get(id).cloned())
    }

    async fn get_deployment_by_endpoint(
        &self,
        endpoint_path: &str,
    ) -> StorageResult<Option<Deployment>> {
        let store = self.store.read().await;
        Ok(store
            .values()
            .find(|d| d.endpoint_path == endpoint_path)
            .cloned())
    }

    async fn list_deployments(
        &self,
        filter: DeploymentFilter,
    ) -> StorageResult<Vec<Deployment>> {
        let store = self.store.read().await;
        let mut deployments: Vec<Deployment> = store
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        deployments.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        Ok(deployments)
    }

    async fn update_deployment(
        &self,
        deployment: &Deployment,
        expected: DeploymentStatus,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        let current = store
            .get_mut(&deployment.id)
            .ok_or_else(|| StorageError::NotFound(deployment.id.clone()))?;
        if current.status != expected {
            return Err(StorageError::Conflict(format!(
                "deployment {} is {}, expected {}",
                deployment.id, current.status, expected
            )));
        }
        *current = deployment.clone();
        Ok(())
    }

    async fn delete_deployment(&self, id: &str) -> StorageResult<()> {
        let mut store = self.store.write().await;
        store.remove(id);
        Ok(())
    }
}

#[async_trait]
impl UsageStorage for MemoryUsageStorage {
    async fn insert_record(&self, record: &UsageRecord) -> StorageResult<()> {
        let mut store = self.store.write().await;
        if store.contains_key(&record.id) {
            return Err(StorageError::AlreadyExists(record.id.clone()));
        }
        if record.is_open()
            && store
                .values()
                .any(|r| r.is_open() && r.resource == record.resource)
        {
            return Err(StorageError::Conflict(format!(
                "{} already has an open usage window",
                record.resource
            )));
        }
        store.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn open_records(
        &self,
        resource: &ResourceRef,
    ) -> StorageResult<Vec<UsageRecord>> {
        let store = self.store.read().await;
        let mut open: Vec<UsageRecord> = store
            .values()
            .filter(|r| r.is_open() && &r.resource == resource)
            .cloned()
            .collect();
        open.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(open)
    }

    async fn update_open_record(
        &self,
        record: &UsageRecord,
    ) -> StorageResult<()> {
        let mut store = self.store.write().await;
        let current = store
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::NotFound(record.id.clone()))?;
        if !current.is_open() {
            return Err(StorageError::Conflict(format!(
                "usage record {} is already closed",
                record.id
            )));
        }
        *current = record.clone();
        Ok(())
    }

    async fn list_records(
        &self,
        filter: UsageFilter,
    ) -> StorageResult<Vec<UsageRecord>> {
        let store = self.store.read().await;
        let mut records: Vec<UsageRecord> = store
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }
}

#[async_trait]
impl ApiCallStorage for MemoryApiCallStorage {
    async fn append_call(&self, call: &ApiCall) -> StorageResult<()> {
        let mut calls = self.calls.write().await;
        calls.push(call.clone());
        Ok(())
    }

    async fn list_calls(
        &self,
        filter: ApiCallFilter,
    ) -> StorageResult<Vec<ApiCall>> {
        let calls = self.calls.read().await;
        Ok(calls
            .iter()
            .filter(|c| {
                filter
                    .deployment_ids
                    .as_ref()
                    .is_none_or(|ids| ids.contains(&c.deployment_id))
                    && filter.since.is_none_or(|since| c.timestamp >= since)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ModelStorage for MemoryModelStorage {
    async fn store_model(&self, model: &ModelDescriptor) -> StorageResult<()> {
        let mut store = self.store.write().await;
        store.insert(model.id.clone(), model.clone());
        Ok(())
    }

    async fn get_model(
        &self,
        id: &str,
    ) -> StorageResult<Option<ModelDescriptor>> {
        let store = self.store.read().await;
        Ok(store.get(id).cloned())
    }

    async fn list_models(
        &self,
        owner_id: &str,
    ) -> StorageResult<Vec<ModelDescriptor>> {
        let store = self.store.read().await;
        let mut models: Vec<ModelDescriptor> = store
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        models.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(models)
    }
}

pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    type NotebookStorage = MemoryNotebookStorage;
    type DeploymentStorage = MemoryDeploymentStorage;
    type UsageStorage = MemoryUsageStorage;
    type ApiCallStorage = MemoryApiCallStorage;
    type ModelStorage = MemoryModelStorage;

    fn create_notebook_storage(&self) -> Self::NotebookStorage {
        MemoryNotebookStorage::new()
    }

    fn create_deployment_storage(&self) -> Self::DeploymentStorage {
        MemoryDeploymentStorage::new()
    }

    fn create_usage_storage(&self) -> Self::UsageStorage {
        MemoryUsageStorage::new()
    }

    fn create_api_call_storage(&self) -> Self::ApiCallStorage {
        MemoryApiCallStorage::new()
    }

    fn create_model_storage(&self) -> Self::ModelStorage {
        MemoryModelStorage::new()
    }
}
