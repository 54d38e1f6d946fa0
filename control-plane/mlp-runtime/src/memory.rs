//! In-process runtime used by tests and local development.
//!
//! Containers are plain map entries. Failures and latency can be injected
//! per operation.

use async_trait::async_trait;
use mlp_models::{ScalingBounds, ServingArtifact};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{RuntimeError, RuntimeResult};
use crate::gateway::{
    RuntimeGateway, RuntimeStatus, SandboxInfo, SandboxSpec, ServiceInfo, access_url,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Provision,
    Start,
    Stop,
    Remove,
    Build,
    StopService,
    Scale,
    Proxy,
    Inspect,
    Logs,
}

#[derive(Debug, Clone)]
struct Container {
    name: String,
    status: RuntimeStatus,
    port: u16,
    token: Option<String>,
    logs: Vec<String>,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, Container>,
    failures: HashMap<RuntimeOp, VecDeque<RuntimeError>>,
    calls: HashMap<RuntimeOp, usize>,
    next_id: u64,
    proxy_delay: Duration,
}

impl State {
    fn enter(&mut self, op: RuntimeOp) -> RuntimeResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn find_by_name(&self, name: &str) -> Option<String> {
        self.containers
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone())
    }

    fn create(&mut self, name: &str, token: Option<String>) -> (String, u16) {
        self.next_id += 1;
        let id = format!("mem-{:06}", self.next_id);
        let port = 30000 + (self.next_id % 30000) as u16;
        self.containers.insert(
            id.clone(),
            Container {
                name: name.to_string(),
                status: RuntimeStatus::Running,
                port,
                token,
                logs: vec![format!("container {name} started")],
            },
        );
        (id, port)
    }

    /// Containers are addressable by id or by name, like Docker's.
    fn resolve(&self, handle: &str) -> Option<String> {
        if self.containers.contains_key(handle) {
            Some(handle.to_string())
        } else {
            self.find_by_name(handle)
        }
    }

    fn get_mut(&mut self, handle: &str) -> RuntimeResult<&mut Container> {
        let id = self.resolve(handle).unwrap_or_else(|| handle.to_string());
        self.containers
            .get_mut(&id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {handle}")))
    }

    fn remove(&mut self, handle: &str) {
        if let Some(id) = self.resolve(handle) {
            self.containers.remove(&id);
        }
    }
}

fn endpoint(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Runtime gateway that keeps containers in memory.
#[derive(Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
    latency: Duration,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call of `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub async fn fail_next(&self, op: RuntimeOp, err: RuntimeError) {
        self.state
            .lock()
            .await
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub async fn calls(&self, op: RuntimeOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    /// Force the observed status of a container.
    pub async fn set_status(&self, handle: &str, status: RuntimeStatus) {
        if let Ok(c) = self.state.lock().await.get_mut(handle) {
            c.status = status;
        }
    }

    /// Drop a container behind the manager's back.
    pub async fn remove_externally(&self, handle: &str) {
        self.state.lock().await.remove(handle);
    }

    /// Simulated service processing time for proxied requests.
    pub async fn set_proxy_delay(&self, delay: Duration) {
        self.state.lock().await.proxy_delay = delay;
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RuntimeGateway for InMemoryRuntime {
    async fn provision_sandbox(&self, spec: &SandboxSpec) -> RuntimeResult<SandboxInfo> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Provision)?;
        let (handle, port) = match state.find_by_name(&spec.name) {
            Some(id) => {
                let c = state.get_mut(&id)?;
                c.status = RuntimeStatus::Running;
                let port = c.port;
                (id, port)
            }
            None => state.create(&spec.name, spec.access_token.clone()),
        };
        Ok(SandboxInfo {
            handle,
            endpoint: access_url(&endpoint(port), spec.access_token.as_deref()),
        })
    }

    async fn start_sandbox(&self, handle: &str) -> RuntimeResult<String> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Start)?;
        let c = state.get_mut(handle)?;
        c.status = RuntimeStatus::Running;
        c.logs.push("started".into());
        Ok(access_url(&endpoint(c.port), c.token.as_deref()))
    }

    async fn stop_sandbox(&self, handle: &str) -> RuntimeResult<()> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Stop)?;
        if let Ok(c) = state.get_mut(handle) {
            c.status = RuntimeStatus::Exited;
            c.logs.push("stopped".into());
        }
        Ok(())
    }

    async fn remove_sandbox(&self, handle: &str) -> RuntimeResult<()> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Remove)?;
        state.remove(handle);
        Ok(())
    }

    async fn build_and_run_service(
        &self,
        artifact: &ServingArtifact,
    ) -> RuntimeResult<ServiceInfo> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Build)?;
        let handle = match state.find_by_name(&artifact.name) {
            Some(id) => id,
            None => state.create(&artifact.name, None).0,
        };
        let c = state.get_mut(&handle)?;
        c.status = RuntimeStatus::Running;
        c.logs.push(format!("serving {} model", artifact.family));
        Ok(ServiceInfo {
            endpoint: endpoint(c.port),
            handle,
        })
    }

    async fn stop_service(&self, handle: &str) -> RuntimeResult<()> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::StopService)?;
        state.remove(handle);
        Ok(())
    }

    async fn scale_service(&self, handle: &str, bounds: ScalingBounds) -> RuntimeResult<()> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Scale)?;
        if bounds.min_instances > 1 {
            return Err(RuntimeError::Unsupported(format!(
                "single-container runtime cannot hold {} instances",
                bounds.min_instances
            )));
        }
        state.get_mut(handle).map(|_| ())
    }

    async fn proxy_request(
        &self,
        url: &str,
        _credential: &str,
        payload: &Value,
        timeout: Duration,
    ) -> RuntimeResult<Value> {
        let delay = {
            let mut state = self.state.lock().await;
            state.enter(RuntimeOp::Proxy)?;
            state.proxy_delay
        };
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(RuntimeError::Timeout(format!(
                "{url} did not answer within {}ms",
                timeout.as_millis()
            )));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match payload.get("features") {
            Some(features) => Ok(json!({ "prediction": features })),
            None => Err(RuntimeError::Upstream {
                status: 422,
                message: "missing field `features`".into(),
            }),
        }
    }

    async fn service_endpoint(&self, handle: &str) -> RuntimeResult<String> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Inspect)?;
        state.get_mut(handle).map(|c| endpoint(c.port))
    }

    async fn inspect_status(&self, handle: &str) -> RuntimeResult<RuntimeStatus> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Inspect)?;
        Ok(state
            .get_mut(handle)
            .map(|c| c.status)
            .unwrap_or(RuntimeStatus::NotFound))
    }

    async fn fetch_logs(&self, handle: &str, tail: usize) -> RuntimeResult<String> {
        let mut state = self.state.lock().await;
        state.enter(RuntimeOp::Logs)?;
        let c = state.get_mut(handle)?;
        let skip = c.logs.len().saturating_sub(tail);
        let mut out = c.logs[skip..].join("\n");
        out.push('\n');
        Ok(out)
    }
}
