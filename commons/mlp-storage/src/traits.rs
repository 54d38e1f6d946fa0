use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mlp_models::{
    ApiCall, Deployment, DeploymentStatus, ModelDescriptor, Notebook,
    NotebookStatus, ResourceRef, UsageRecord, UsageResourceType,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait StorageHealth: Send + Sync {
    /// Lightweight connectivity check to the backing store.
    async fn health(&self) -> StorageResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct NotebookFilter {
    pub owner_id: Option<String>,
    pub status: Option<NotebookStatus>,
    pub last_accessed_before: Option<DateTime<Utc>>,
    pub status_changed_before: Option<DateTime<Utc>>,
    /// Deleted notebooks are hidden unless asked for or matched by `status`.
    pub include_deleted: bool,
}

impl NotebookFilter {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(status: NotebookStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, notebook: &Notebook) -> bool {
        if let Some(owner) = &self.owner_id {
            if &notebook.owner_id != owner {
                return false;
            }
        }
        match self.status {
            Some(status) if notebook.status != status => return false,
            None if !self.include_deleted
                && notebook.status == NotebookStatus::Deleted =>
            {
                return false;
            }
            _ => {}
        }
        if let Some(before) = self.last_accessed_before {
            if notebook.last_accessed >= before {
                return false;
            }
        }
        if let Some(before) = self.status_changed_before {
            if notebook.status_changed_at >= before {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub owner_id: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub status_changed_before: Option<DateTime<Utc>>,
}

impl DeploymentFilter {
    pub fn matches(&self, deployment: &Deployment) -> bool {
        if let Some(owner) = &self.owner_id {
            if &deployment.owner_id != owner {
                return false;
            }
        }
        if let Some(status) = self.status {
            if deployment.status != status {
                return false;
            }
        }
        if let Some(before) = self.status_changed_before {
            if deployment.status_changed_at >= before {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub user_id: Option<String>,
    pub resource: Option<ResourceRef>,
    pub resource_type: Option<UsageResourceType>,
    /// Records whose window started at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl UsageFilter {
    pub fn matches(&self, record: &UsageRecord) -> bool {
        if let Some(user) = &self.user_id {
            if &record.user_id != user {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if &record.resource != resource {
                return false;
            }
        }
        if let Some(rt) = self.resource_type {
            if record.resource_type != rt {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.start_time < since {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiCallFilter {
    pub deployment_ids: Option<Vec<String>>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait NotebookStorage: Send + Sync + StorageHealth {
    /// Fails with `AlreadyExists` if the id is taken.
    async fn insert_notebook(&self, notebook: &Notebook) -> StorageResult<()>;
    async fn get_notebook(&self, id: &str) -> StorageResult<Option<Notebook>>;
    async fn list_notebooks(
        &self,
        filter: NotebookFilter,
    ) -> StorageResult<Vec<Notebook>>;
    /// Replaces the stored record only if its status is still `expected`.
    async fn update_notebook(
        &self,
        notebook: &Notebook,
        expected: NotebookStatus,
    ) -> StorageResult<()>;
}

#[async_trait]
pub trait DeploymentStorage: Send + Sync + StorageHealth {
    /// Fails with `AlreadyExists` if the id or endpoint path is taken.
    async fn insert_deployment(
        &self,
        deployment: &Deployment,
    ) -> StorageResult<()>;
    async fn get_deployment(
        &self,
        id: &str,
    ) -> StorageResult<Option<Deployment>>;
    async fn get_deployment_by_endpoint(
        &self,
        endpoint_path: &str,
    ) -> StorageResult<Option<Deployment>>;
    async fn list_deployments(
        &self,
        filter: DeploymentFilter,
    ) -> StorageResult<Vec<Deployment>>;
    /// Replaces the stored record only if its status is still `expected`.
    async fn update_deployment(
        &self,
        deployment: &Deployment,
        expected: DeploymentStatus,
    ) -> StorageResult<()>;
    async fn delete_deployment(&self, id: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait UsageStorage: Send + Sync + StorageHealth {
    /// Inserting an open record fails with `Conflict` when the resource
    /// already has one.
    async fn insert_record(&self, record: &UsageRecord) -> StorageResult<()>;
    /// Open records for a resource, most recent start first.
    async fn open_records(
        &self,
        resource: &ResourceRef,
    ) -> StorageResult<Vec<UsageRecord>>;
    /// Replaces a record only while the stored copy is still open.
    async fn update_open_record(
        &self,
        record: &UsageRecord,
    ) -> StorageResult<()>;
    /// Matching records ordered by start time.
    async fn list_records(
        &self,
        filter: UsageFilter,
    ) -> StorageResult<Vec<UsageRecord>>;
}

#[async_trait]
pub trait ApiCallStorage: Send + Sync + StorageHealth {
    async fn append_call(&self, call: &ApiCall) -> StorageResult<()>;
    async fn list_calls(
        &self,
        filter: ApiCallFilter,
    ) -> StorageResult<Vec<ApiCall>>;
}

#[async_trait]
pub trait ModelStorage: Send + Sync + StorageHealth {
    async fn store_model(&self, model: &ModelDescriptor) -> StorageResult<()>;
    async fn get_model(
        &self,
        id: &str,
    ) -> StorageResult<Option<ModelDescriptor>>;
    async fn list_models(
        &self,
        owner_id: &str,
    ) -> StorageResult<Vec<ModelDescriptor>>;
}

pub trait StorageFactory {
    type NotebookStorage: NotebookStorage;
    type DeploymentStorage: DeploymentStorage;
    type UsageStorage: UsageStorage;
    type ApiCallStorage: ApiCallStorage;
    type ModelStorage: ModelStorage;

    fn create_notebook_storage(&self) -> Self::NotebookStorage;
    fn create_deployment_storage(&self) -> Self::DeploymentStorage;
    fn create_usage_storage(&self) -> Self::UsageStorage;
    fn create_api_call_storage(&self) -> Self::ApiCallStorage;
    fn create_model_storage(&self) -> Self::ModelStorage;
}
