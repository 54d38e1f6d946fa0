use chrono::{DateTime, Utc};
use mlp_models::{
    EnvVar, Notebook, NotebookSpec, NotebookStatus, ResourceRef,
    UsageResourceType,
};
use mlp_runtime::{
    RuntimeError, RuntimeGateway, RuntimeStatus, SandboxSpec, VolumeMount,
};
use mlp_storage::{NotebookFilter, NotebookStorage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::clock::Clock;
use crate::config::NotebookPolicyConfig;
use crate::errors::LifecycleError;
use crate::services::accrual::UsageAccrualEngine;
use crate::services::ids;
use crate::services::locks::ResourceLocks;

const KIND: &str = "notebook";

pub fn sandbox_name(id: &str) -> String {
    format!("notebook-{id}")
}

pub struct NotebookService {
    storage: Arc<dyn NotebookStorage>,
    runtime: Arc<dyn RuntimeGateway>,
    accrual: Arc<UsageAccrualEngine>,
    locks: Arc<ResourceLocks>,
    clock: Arc<dyn Clock>,
    policy: NotebookPolicyConfig,
}

impl NotebookService {
    pub fn new(
        storage: Arc<dyn NotebookStorage>,
        runtime: Arc<dyn RuntimeGateway>,
        accrual: Arc<UsageAccrualEngine>,
        locks: Arc<ResourceLocks>,
        clock: Arc<dyn Clock>,
        policy: NotebookPolicyConfig,
    ) -> Self {
        Self {
            storage,
            runtime,
            accrual,
            locks,
            clock,
            policy,
        }
    }

    pub async fn health(&self) -> Result<(), LifecycleError> {
        self.storage.health().await.map_err(Into::into)
    }

    async fn load(&self, id: &str) -> Result<Notebook, LifecycleError> {
        self.storage
            .get_notebook(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("notebook {id}")))
    }

    async fn load_owned(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Notebook, LifecycleError> {
        let notebook = self.load(id).await?;
        if notebook.owner_id != owner {
            return Err(LifecycleError::forbidden(format!(
                "notebook {id} belongs to another user"
            )));
        }
        Ok(notebook)
    }

    fn sandbox_spec(&self, notebook: &Notebook, token: &str) -> SandboxSpec {
        let gpu = notebook.has_gpu();
        let mut labels = BTreeMap::new();
        labels.insert("mlp.notebook".to_string(), notebook.id.clone());
        labels.insert("mlp.owner".to_string(), notebook.owner_id.clone());
        if let Some(gpu_type) = &notebook.gpu_type {
            labels.insert("mlp.gpu".to_string(), gpu_type.clone());
        }
        SandboxSpec {
            name: sandbox_name(&notebook.id),
            image: if gpu {
                self.policy.gpu_image.clone()
            } else {
                self.policy.cpu_image.clone()
            },
            gpu,
            cpu_cores: notebook.cpu_cores,
            memory_gb: notebook.memory_gb,
            port: self.policy.port,
            health_path: self.policy.health_path.clone(),
            token_env: Some(self.policy.token_env.clone()),
            access_token: Some(token.to_string()),
            env: vec![
                EnvVar::new("NOTEBOOK_ID", notebook.id.clone()),
                EnvVar::new("JUPYTER_ENABLE_LAB", "yes"),
            ],
            volume: Some(VolumeMount {
                name: format!("notebook-data-{}", notebook.id),
                target: self.policy.data_mount.clone(),
            }),
            labels,
        }
    }

    async fn open_window(
        &self,
        notebook: &Notebook,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.accrual
            .open_window(
                &notebook.owner_id,
                ResourceRef::Notebook(notebook.id.clone()),
                UsageResourceType::NotebookRuntime,
                notebook.usage_metadata(),
                now,
            )
            .await?;
        Ok(())
    }

    pub async fn create(
        &self,
        owner: &str,
        spec: NotebookSpec,
    ) -> Result<Notebook, LifecycleError> {
        spec.validate()?;
        let now = self.clock.now();
        let mut notebook =
            Notebook::new(ids::resource_id(), owner.to_string(), spec, now);
        let _guard = self.locks.lock(&notebook.id).await;
        self.storage.insert_notebook(&notebook).await?;
        info!(notebook = %notebook.id, owner, gpu = notebook.has_gpu(), "creating notebook");

        let token = ids::hex_token();
        let sandbox = self.sandbox_spec(&notebook, &token);
        match self.runtime.provision_sandbox(&sandbox).await {
            Ok(info) => {
                let now = self.clock.now();
                notebook.runtime_handle = Some(info.handle);
                notebook.access_url = Some(info.endpoint);
                notebook.last_accessed = now;
                notebook.set_status(NotebookStatus::Running, now);
                self.storage
                    .update_notebook(&notebook, NotebookStatus::Creating)
                    .await?;
                self.open_window(&notebook, now).await?;
                info!(notebook = %notebook.id, "notebook running");
                Ok(notebook)
            }
            Err(e) => {
                warn!(notebook = %notebook.id, error = %e, "sandbox provisioning failed");
                self.fail(notebook, NotebookStatus::Creating, e).await
            }
        }
    }

    /// Persist `failed` and report the runtime error that caused it.
    async fn fail(
        &self,
        mut notebook: Notebook,
        expected: NotebookStatus,
        source: RuntimeError,
    ) -> Result<Notebook, LifecycleError> {
        notebook.runtime_handle = None;
        notebook.access_url = None;
        notebook.set_status(NotebookStatus::Failed, self.clock.now());
        self.storage.update_notebook(&notebook, expected).await?;
        Err(LifecycleError::Transition {
            kind: KIND,
            id: notebook.id,
            status: NotebookStatus::Failed.to_string(),
            source,
        })
    }

    pub async fn start(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Notebook, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let mut notebook = self.load_owned(owner, id).await?;
        match notebook.status {
            NotebookStatus::Running => return Ok(notebook),
            NotebookStatus::Stopped => {}
            other => {
                return Err(LifecycleError::Conflict(format!(
                    "notebook {id} is {other} and cannot be started"
                )));
            }
        }
        let handle = notebook.runtime_handle.clone().ok_or_else(|| {
            LifecycleError::Conflict(format!("notebook {id} has no container"))
        })?;

        let url = self.runtime.start_sandbox(&handle).await?;
        let now = self.clock.now();
        notebook.access_url = Some(url);
        notebook.last_accessed = now;
        notebook.set_status(NotebookStatus::Running, now);
        self.storage
            .update_notebook(&notebook, NotebookStatus::Stopped)
            .await?;
        self.open_window(&notebook, now).await?;
        info!(notebook = %id, "notebook started");
        Ok(notebook)
    }

    pub async fn stop(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Notebook, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let mut notebook = self.load_owned(owner, id).await?;
        match notebook.status {
            NotebookStatus::Stopped => return Ok(notebook),
            NotebookStatus::Running => {}
            other => {
                return Err(LifecycleError::Conflict(format!(
                    "notebook {id} is {other} and cannot be stopped"
                )));
            }
        }
        notebook.access_url = None;
        notebook.set_status(NotebookStatus::Stopping, self.clock.now());
        self.storage
            .update_notebook(&notebook, NotebookStatus::Running)
            .await?;

        let result = match &notebook.runtime_handle {
            Some(handle) => self.runtime.stop_sandbox(handle).await,
            None => Ok(()),
        };
        let now = self.clock.now();
        self.accrual
            .close_window(
                &ResourceRef::Notebook(id.to_string()),
                notebook.rate_class(),
                now,
            )
            .await?;

        match result {
            Ok(()) => {
                notebook.set_status(NotebookStatus::Stopped, now);
                self.storage
                    .update_notebook(&notebook, NotebookStatus::Stopping)
                    .await?;
                info!(notebook = %id, "notebook stopped");
                Ok(notebook)
            }
            Err(e) => {
                warn!(notebook = %id, error = %e, "sandbox stop failed");
                if let Some(handle) = &notebook.runtime_handle {
                    if let Err(re) = self.runtime.remove_sandbox(handle).await {
                        warn!(notebook = %id, handle = %handle, error = %re, "could not remove failed sandbox");
                    }
                }
                self.fail(notebook, NotebookStatus::Stopping, e).await
            }
        }
    }

    pub async fn delete(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Notebook, LifecycleError> {
        let guard = self.locks.lock(id).await;
        let mut notebook = self.load_owned(owner, id).await?;
        if notebook.status == NotebookStatus::Deleted {
            return Ok(notebook);
        }
        if let Some(handle) = &notebook.runtime_handle {
            self.runtime.remove_sandbox(handle).await?;
        }
        let now = self.clock.now();
        self.accrual
            .close_window(
                &ResourceRef::Notebook(id.to_string()),
                notebook.rate_class(),
                now,
            )
            .await?;
        let expected = notebook.status;
        notebook.runtime_handle = None;
        notebook.access_url = None;
        notebook.set_status(NotebookStatus::Deleted, now);
        self.storage.update_notebook(&notebook, expected).await?;
        drop(guard);
        self.locks.forget(id);
        info!(notebook = %id, "notebook deleted");
        Ok(notebook)
    }

    /// Owner-scoped read. Bumps `last_accessed` unless a transition holds
    /// the notebook.
    pub async fn get(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Notebook, LifecycleError> {
        let mut notebook = self.load_owned(owner, id).await?;
        if notebook.status == NotebookStatus::Deleted {
            return Err(LifecycleError::NotFound(format!("notebook {id}")));
        }
        if let Some(_guard) = self.locks.try_lock(id) {
            let fresh = self.load(id).await?;
            notebook = fresh;
            notebook.last_accessed = self.clock.now();
            if let Err(e) = self
                .storage
                .update_notebook(&notebook, notebook.status)
                .await
            {
                debug!(notebook = %id, error = %e, "last_accessed not bumped");
            }
        }
        Ok(notebook)
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Notebook>, LifecycleError> {
        Ok(self
            .storage
            .list_notebooks(NotebookFilter::owned_by(owner))
            .await?)
    }

    pub async fn logs(
        &self,
        owner: &str,
        id: &str,
        tail: usize,
    ) -> Result<String, LifecycleError> {
        let notebook = self.load_owned(owner, id).await?;
        let handle = notebook.runtime_handle.ok_or_else(|| {
            LifecycleError::NotFound(format!("notebook {id} has no container"))
        })?;
        Ok(self.runtime.fetch_logs(&handle, tail).await?)
    }

    /// Unscoped listing for background jobs.
    pub async fn find(
        &self,
        filter: NotebookFilter,
    ) -> Result<Vec<Notebook>, LifecycleError> {
        Ok(self.storage.list_notebooks(filter).await?)
    }

    /// Delete a stopped notebook not accessed since `cutoff`. Returns false
    /// when the notebook is busy or no longer qualifies.
    pub async fn reclaim_if_idle(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        let Some(guard) = self.locks.try_lock(id) else {
            return Ok(false);
        };
        let mut notebook = self.load(id).await?;
        if notebook.status != NotebookStatus::Stopped
            || notebook.last_accessed >= cutoff
        {
            return Ok(false);
        }
        if let Some(handle) = &notebook.runtime_handle {
            self.runtime.remove_sandbox(handle).await?;
        }
        let now = self.clock.now();
        notebook.runtime_handle = None;
        notebook.set_status(NotebookStatus::Deleted, now);
        self.storage
            .update_notebook(&notebook, NotebookStatus::Stopped)
            .await?;
        drop(guard);
        self.locks.forget(id);
        info!(notebook = %id, last_accessed = %notebook.last_accessed, "idle notebook reclaimed");
        Ok(true)
    }

    /// Project the running cost onto the open window. A running notebook
    /// without one gets a window backdated to when it started running.
    pub async fn refresh_cost(&self, id: &str) -> Result<bool, LifecycleError> {
        let Some(_guard) = self.locks.try_lock(id) else {
            return Ok(false);
        };
        let notebook = self.load(id).await?;
        if notebook.status != NotebookStatus::Running {
            return Ok(false);
        }
        let resource = ResourceRef::Notebook(id.to_string());
        if !self.accrual.has_open_window(&resource).await? {
            warn!(notebook = %id, since = %notebook.status_changed_at, "running notebook has no usage window, opening one");
            self.open_window(&notebook, notebook.status_changed_at).await?;
        }
        let record = self
            .accrual
            .recompute_open_window(&resource, notebook.rate_class(), self.clock.now())
            .await?;
        Ok(record.is_some())
    }

    /// Settle a notebook stuck in `creating` or `stopping` since before
    /// `cutoff` from what the runtime reports. Returns the new status, or
    /// `None` when nothing changed.
    pub async fn repair_stale(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<NotebookStatus>, LifecycleError> {
        let Some(_guard) = self.locks.try_lock(id) else {
            return Ok(None);
        };
        let mut notebook = self.load(id).await?;
        if !notebook.status.is_transitional() || notebook.status_changed_at >= cutoff
        {
            return Ok(None);
        }
        let expected = notebook.status;
        // a crash before the handle was stored leaves only the name
        let handle = notebook
            .runtime_handle
            .clone()
            .unwrap_or_else(|| sandbox_name(id));
        let observed = self.runtime.inspect_status(&handle).await?;
        let resource = ResourceRef::Notebook(id.to_string());
        debug!(notebook = %id, status = %expected, runtime = ?observed, "repairing stale notebook");

        let next = match (expected, observed) {
            (_, RuntimeStatus::Running) => {
                let url = self.runtime.start_sandbox(&handle).await?;
                let now = self.clock.now();
                notebook.runtime_handle = Some(handle);
                notebook.access_url = Some(url);
                notebook.set_status(NotebookStatus::Running, now);
                self.storage.update_notebook(&notebook, expected).await?;
                if !self.accrual.has_open_window(&resource).await? {
                    self.open_window(&notebook, now).await?;
                }
                NotebookStatus::Running
            }
            (NotebookStatus::Creating, s) if s.is_gone() || s == RuntimeStatus::Created => {
                if s != RuntimeStatus::NotFound {
                    self.runtime.remove_sandbox(&handle).await?;
                }
                notebook.runtime_handle = None;
                notebook.access_url = None;
                notebook.set_status(NotebookStatus::Failed, self.clock.now());
                self.storage.update_notebook(&notebook, expected).await?;
                NotebookStatus::Failed
            }
            (NotebookStatus::Stopping, RuntimeStatus::Exited | RuntimeStatus::Created) => {
                let now = self.clock.now();
                self.accrual
                    .close_window(&resource, notebook.rate_class(), now)
                    .await?;
                notebook.access_url = None;
                notebook.set_status(NotebookStatus::Stopped, now);
                self.storage.update_notebook(&notebook, expected).await?;
                NotebookStatus::Stopped
            }
            (NotebookStatus::Stopping, RuntimeStatus::NotFound | RuntimeStatus::Dead) => {
                let now = self.clock.now();
                self.accrual
                    .close_window(&resource, notebook.rate_class(), now)
                    .await?;
                notebook.runtime_handle = None;
                notebook.access_url = None;
                notebook.set_status(NotebookStatus::Failed, now);
                self.storage.update_notebook(&notebook, expected).await?;
                NotebookStatus::Failed
            }
            _ => return Ok(None),
        };
        info!(notebook = %id, from = %expected, to = %next, "stale notebook repaired");
        Ok(Some(next))
    }
}
