use async_trait::async_trait;
use mlp_models::{EnvVar, ScalingBounds, ServingArtifact};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::RuntimeResult;

pub const LABEL_MANAGED: &str = "mlp.managed";
pub const LABEL_PORT: &str = "mlp.port";
pub const LABEL_HEALTH_PATH: &str = "mlp.health-path";
pub const LABEL_TOKEN_ENV: &str = "mlp.token-env";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub target: String,
}

/// Everything the runtime needs to materialize an interactive sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub gpu: bool,
    pub cpu_cores: u32,
    pub memory_gb: u32,
    /// Port the sandbox listens on inside the container.
    pub port: u16,
    pub health_path: String,
    /// Env var carrying the access token, appended to the access URL.
    pub token_env: Option<String>,
    pub access_token: Option<String>,
    pub env: Vec<EnvVar>,
    pub volume: Option<VolumeMount>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInfo {
    pub handle: String,
    /// Externally reachable URL, including the access token when present.
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub handle: String,
    /// Base URL of the service; contract paths are appended to it.
    pub endpoint: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    NotFound,
}

impl RuntimeStatus {
    pub fn from_state(state: &str) -> Self {
        match state {
            "created" => RuntimeStatus::Created,
            "running" => RuntimeStatus::Running,
            "paused" => RuntimeStatus::Paused,
            "restarting" => RuntimeStatus::Restarting,
            "exited" | "removing" => RuntimeStatus::Exited,
            _ => RuntimeStatus::Dead,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeStatus::Running)
    }

    /// The container can no longer serve without intervention.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            RuntimeStatus::NotFound | RuntimeStatus::Dead | RuntimeStatus::Exited
        )
    }
}

/// Adapter over the container runtime. All mutating operations are
/// idempotent: repeating a call that already took effect succeeds.
#[async_trait]
pub trait RuntimeGateway: Send + Sync {
    /// Create and start a sandbox, returning once its health probe passes.
    async fn provision_sandbox(
        &self,
        spec: &SandboxSpec,
    ) -> RuntimeResult<SandboxInfo>;

    /// Start a stopped sandbox and return its access URL.
    async fn start_sandbox(&self, handle: &str) -> RuntimeResult<String>;

    async fn stop_sandbox(&self, handle: &str) -> RuntimeResult<()>;

    async fn remove_sandbox(&self, handle: &str) -> RuntimeResult<()>;

    /// Build the artifact's image, run it, and wait for readiness.
    async fn build_and_run_service(
        &self,
        artifact: &ServingArtifact,
    ) -> RuntimeResult<ServiceInfo>;

    async fn stop_service(&self, handle: &str) -> RuntimeResult<()>;

    async fn scale_service(
        &self,
        handle: &str,
        bounds: ScalingBounds,
    ) -> RuntimeResult<()>;

    /// POST `payload` to `url`, bounded by `timeout`.
    async fn proxy_request(
        &self,
        url: &str,
        credential: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> RuntimeResult<serde_json::Value>;

    /// Base URL a running service publishes, recovered from the runtime.
    async fn service_endpoint(&self, handle: &str) -> RuntimeResult<String>;

    async fn inspect_status(&self, handle: &str) -> RuntimeResult<RuntimeStatus>;

    async fn fetch_logs(&self, handle: &str, tail: usize) -> RuntimeResult<String>;
}

pub(crate) fn access_url(base: &str, token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => format!("{base}/?token={t}"),
        _ => base.to_string(),
    }
}
