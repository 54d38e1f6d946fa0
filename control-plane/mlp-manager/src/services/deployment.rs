use chrono::{DateTime, Utc};
use mlp_models::{
    ApiCall, Deployment, DeploymentSpec, DeploymentStatus, EntryContract,
    ScalingBounds,
};
use mlp_runtime::{RuntimeError, RuntimeGateway};
use mlp_storage::{ApiCallFilter, ApiCallStorage, DeploymentFilter, DeploymentStorage};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::clock::Clock;
use crate::config::DeploymentPolicyConfig;
use crate::errors::{AuthFailure, LifecycleError};
use crate::models::{ApiCallStats, PredictionResponse, ScaleResponse};
use crate::services::artifact::{self, service_name};
use crate::services::ids;
use crate::services::locks::ResourceLocks;
use crate::services::model::ModelService;
use crate::services::accrual::UsageAccrualEngine;

const KIND: &str = "deployment";

pub struct DeploymentService {
    storage: Arc<dyn DeploymentStorage>,
    api_calls: Arc<dyn ApiCallStorage>,
    models: Arc<ModelService>,
    runtime: Arc<dyn RuntimeGateway>,
    accrual: Arc<UsageAccrualEngine>,
    locks: Arc<ResourceLocks>,
    clock: Arc<dyn Clock>,
    policy: DeploymentPolicyConfig,
}

impl DeploymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn DeploymentStorage>,
        api_calls: Arc<dyn ApiCallStorage>,
        models: Arc<ModelService>,
        runtime: Arc<dyn RuntimeGateway>,
        accrual: Arc<UsageAccrualEngine>,
        locks: Arc<ResourceLocks>,
        clock: Arc<dyn Clock>,
        policy: DeploymentPolicyConfig,
    ) -> Self {
        Self {
            storage,
            api_calls,
            models,
            runtime,
            accrual,
            locks,
            clock,
            policy,
        }
    }

    pub async fn health(&self) -> Result<(), LifecycleError> {
        self.storage.health().await?;
        self.api_calls.health().await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Deployment, LifecycleError> {
        self.storage
            .get_deployment(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("deployment {id}")))
    }

    async fn load_owned(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Deployment, LifecycleError> {
        let deployment = self.load(id).await?;
        if deployment.owner_id != owner {
            return Err(LifecycleError::forbidden(format!(
                "deployment {id} belongs to another user"
            )));
        }
        Ok(deployment)
    }

    pub async fn create(
        &self,
        owner: &str,
        spec: DeploymentSpec,
    ) -> Result<Deployment, LifecycleError> {
        spec.validate()?;
        let model = self.models.get_ready_model(&spec.model_id, owner).await?;

        let mut deployment = Deployment::new(
            ids::resource_id(),
            owner.to_string(),
            spec,
            ids::endpoint_path(),
            ids::api_key(),
            self.clock.now(),
        );
        let _guard = self.locks.lock(&deployment.id).await;
        self.storage.insert_deployment(&deployment).await?;
        info!(deployment = %deployment.id, model = %model.id, instance_type = %deployment.instance_type, "deploying model");

        let artifact = match artifact::synthesize(&deployment, &model) {
            Ok(a) => a,
            Err(e) => {
                warn!(deployment = %deployment.id, error = %e, "serving artifact synthesis failed");
                deployment.set_status(DeploymentStatus::Failed, self.clock.now());
                self.storage
                    .update_deployment(&deployment, DeploymentStatus::Deploying)
                    .await?;
                return Err(e.into());
            }
        };

        match self.runtime.build_and_run_service(&artifact).await {
            Ok(service) => {
                deployment.runtime_handle = Some(service.handle);
                deployment.service_url = Some(service.endpoint);
                deployment.set_status(DeploymentStatus::Running, self.clock.now());
                self.storage
                    .update_deployment(&deployment, DeploymentStatus::Deploying)
                    .await?;
                info!(deployment = %deployment.id, "deployment running");
                Ok(deployment)
            }
            Err(e) => {
                warn!(deployment = %deployment.id, error = %e, "deployment failed");
                deployment.set_status(DeploymentStatus::Failed, self.clock.now());
                self.storage
                    .update_deployment(&deployment, DeploymentStatus::Deploying)
                    .await?;
                Err(LifecycleError::Transition {
                    kind: KIND,
                    id: deployment.id,
                    status: DeploymentStatus::Failed.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Serve one prediction through the deployment behind `endpoint_path`.
    /// Every attempt against a known deployment is recorded as an ApiCall.
    pub async fn predict(
        &self,
        endpoint_path: &str,
        credential: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<PredictionResponse, LifecycleError> {
        let deployment = self
            .storage
            .get_deployment_by_endpoint(endpoint_path)
            .await?
            .ok_or_else(|| {
                LifecycleError::NotFound(format!("endpoint {endpoint_path}"))
            })?;
        let started = Instant::now();

        let outcome = self.serve(&deployment, credential, &payload).await;
        let response_time_ms = started.elapsed().as_millis() as u64;
        let now = self.clock.now();

        let (success, error_code, error_message) = match &outcome {
            Ok(_) => (true, None, None),
            Err(e) => (false, Some(call_error_code(e)), Some(e.to_string())),
        };
        let call = ApiCall {
            id: nanoid::nanoid!(),
            deployment_id: deployment.id.clone(),
            timestamp: now,
            response_time_ms,
            success,
            error_code: error_code.map(str::to_string),
            error_message,
        };
        if let Err(e) = self.api_calls.append_call(&call).await {
            warn!(deployment = %deployment.id, error = %e, "failed to record api call");
        }

        let result = outcome?;
        let billed = match self
            .accrual
            .charge_call(
                &deployment.owner_id,
                &deployment.id,
                &deployment.instance_type,
                now,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(deployment = %deployment.id, call = %call.id, error = %e, "failed to charge api call");
                false
            }
        };
        debug!(deployment = %deployment.id, response_time_ms, billed, "prediction served");
        Ok(PredictionResponse {
            deployment_id: deployment.id,
            response_time_ms,
            billed,
            result,
        })
    }

    async fn serve(
        &self,
        deployment: &Deployment,
        credential: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, LifecycleError> {
        let credential = match credential {
            Some(c) if c == deployment.api_key => c,
            _ => {
                return Err(LifecycleError::bad_credential(
                    "missing or invalid API key",
                ));
            }
        };
        let base = match (&deployment.status, &deployment.service_url) {
            (DeploymentStatus::Running, Some(url)) => url,
            (status, _) => {
                return Err(LifecycleError::inactive(format!(
                    "deployment {} is {status}",
                    deployment.id
                )));
            }
        };
        let url = format!("{base}{}", EntryContract::default().predict_path);
        Ok(self
            .runtime
            .proxy_request(&url, credential, payload, self.policy.predict_timeout)
            .await?)
    }

    /// Persist new bounds, then apply them at the runtime. Runtime failures
    /// are reported in the response and do not roll back the bounds.
    pub async fn scale(
        &self,
        owner: &str,
        id: &str,
        bounds: ScalingBounds,
    ) -> Result<ScaleResponse, LifecycleError> {
        bounds.validate()?;
        let _guard = self.locks.lock(id).await;
        let mut deployment = self.load_owned(owner, id).await?;
        let expected = deployment.status;
        deployment.scaling = bounds;
        deployment.updated_at = self.clock.now();
        self.storage.update_deployment(&deployment, expected).await?;

        let applied = match (&deployment.runtime_handle, expected) {
            (Some(handle), DeploymentStatus::Running) => {
                self.runtime.scale_service(handle, bounds).await
            }
            _ => Err(RuntimeError::Invalid(format!(
                "deployment {id} is {expected}"
            ))),
        };
        let message = match applied {
            Ok(()) => {
                info!(deployment = %id, min = bounds.min_instances, max = bounds.max_instances, "deployment scaled");
                None
            }
            Err(e) => {
                warn!(deployment = %id, error = %e, "scaling not applied");
                Some(e.to_string())
            }
        };
        Ok(ScaleResponse {
            deployment_id: deployment.id,
            scaling: bounds,
            applied: message.is_none(),
            message,
        })
    }

    pub async fn delete(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Deployment, LifecycleError> {
        let guard = self.locks.lock(id).await;
        let mut deployment = self.load_owned(owner, id).await?;
        if let Some(handle) = &deployment.runtime_handle {
            self.runtime.stop_service(handle).await?;
        }
        let expected = deployment.status;
        deployment.runtime_handle = None;
        deployment.service_url = None;
        deployment.set_status(DeploymentStatus::Stopped, self.clock.now());
        self.storage.update_deployment(&deployment, expected).await?;
        self.storage.delete_deployment(id).await?;
        drop(guard);
        self.locks.forget(id);
        info!(deployment = %id, "deployment deleted");
        Ok(deployment)
    }

    pub async fn get(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Deployment, LifecycleError> {
        self.load_owned(owner, id).await
    }

    pub async fn list(
        &self,
        owner: &str,
    ) -> Result<Vec<Deployment>, LifecycleError> {
        Ok(self
            .storage
            .list_deployments(DeploymentFilter {
                owner_id: Some(owner.to_string()),
                ..Default::default()
            })
            .await?)
    }

    pub async fn call_stats(
        &self,
        owner: &str,
    ) -> Result<ApiCallStats, LifecycleError> {
        let ids: Vec<String> =
            self.list(owner).await?.into_iter().map(|d| d.id).collect();
        if ids.is_empty() {
            return Ok(ApiCallStats::default());
        }
        let calls = self
            .api_calls
            .list_calls(ApiCallFilter {
                deployment_ids: Some(ids),
                since: None,
            })
            .await?;
        Ok(summarize_calls(&calls))
    }

    pub async fn find(
        &self,
        filter: DeploymentFilter,
    ) -> Result<Vec<Deployment>, LifecycleError> {
        Ok(self.storage.list_deployments(filter).await?)
    }

    /// Mark a running deployment `failed` when its container is gone.
    pub async fn detect_drift(&self, id: &str) -> Result<bool, LifecycleError> {
        let Some(_guard) = self.locks.try_lock(id) else {
            return Ok(false);
        };
        let mut deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Running {
            return Ok(false);
        }
        if let Some(handle) = &deployment.runtime_handle {
            let observed = self.runtime.inspect_status(handle).await?;
            if !observed.is_gone() {
                return Ok(false);
            }
            warn!(deployment = %id, handle = %handle, runtime = ?observed, "deployment container lost");
        }
        deployment.service_url = None;
        deployment.set_status(DeploymentStatus::Failed, self.clock.now());
        self.storage
            .update_deployment(&deployment, DeploymentStatus::Running)
            .await?;
        Ok(true)
    }

    /// Settle a deployment stuck in `deploying` since before `cutoff`. A
    /// live container is adopted, anything else fails the deployment.
    pub async fn repair_stale(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        let Some(_guard) = self.locks.try_lock(id) else {
            return Ok(false);
        };
        let mut deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Deploying
            || deployment.status_changed_at >= cutoff
        {
            return Ok(false);
        }
        let handle = deployment
            .runtime_handle
            .clone()
            .unwrap_or_else(|| service_name(id));
        let observed = self.runtime.inspect_status(&handle).await?;
        if observed.is_running() {
            match self.runtime.service_endpoint(&handle).await {
                Ok(url) => {
                    deployment.runtime_handle = Some(handle);
                    deployment.service_url = Some(url);
                    deployment.set_status(DeploymentStatus::Running, self.clock.now());
                    self.storage
                        .update_deployment(&deployment, DeploymentStatus::Deploying)
                        .await?;
                    info!(deployment = %id, "stale deployment adopted running container");
                    return Ok(true);
                }
                Err(e) => {
                    warn!(deployment = %id, handle = %handle, error = %e, "running container has no endpoint, stopping");
                    self.runtime.stop_service(&handle).await?;
                }
            }
        }
        deployment.service_url = None;
        deployment.set_status(DeploymentStatus::Failed, self.clock.now());
        self.storage
            .update_deployment(&deployment, DeploymentStatus::Deploying)
            .await?;
        info!(deployment = %id, runtime = ?observed, "stale deployment failed");
        Ok(true)
    }
}

fn call_error_code(e: &LifecycleError) -> &'static str {
    match e {
        LifecycleError::Authorization {
            reason: AuthFailure::Inactive,
            ..
        } => "inactive",
        LifecycleError::Authorization { .. } => "unauthorized",
        LifecycleError::Runtime(re) => re.code(),
        LifecycleError::Transition { source, .. } => source.code(),
        _ => "internal",
    }
}

fn summarize_calls(calls: &[ApiCall]) -> ApiCallStats {
    if calls.is_empty() {
        return ApiCallStats::default();
    }
    let total = calls.len();
    let successful = calls.iter().filter(|c| c.success).count();
    let latency: u64 = calls.iter().map(|c| c.response_time_ms).sum();
    ApiCallStats {
        total_calls: total,
        successful_calls: successful,
        avg_response_time_ms: latency as f64 / total as f64,
        success_rate: successful as f64 * 100.0 / total as f64,
    }
}
