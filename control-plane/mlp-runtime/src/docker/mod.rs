//! Docker Engine adapter speaking the engine's REST API over HTTP.

mod context;
mod logs;

pub use context::{build_context, render_dockerfile};
pub use logs::demux_log_stream;

use async_trait::async_trait;
use mlp_models::{ScalingBounds, ServingArtifact};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::gateway::{
    LABEL_HEALTH_PATH, LABEL_MANAGED, LABEL_PORT, LABEL_TOKEN_ENV,
    RuntimeGateway, RuntimeStatus, SandboxInfo, SandboxSpec, ServiceInfo,
    access_url,
};
use crate::readiness::{ReadinessConfig, wait_until_ready};

#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Engine endpoint, e.g. `http://localhost:2375`.
    pub url: String,
    pub api_version: String,
    /// Host name used when building externally reachable URLs.
    pub public_host: String,
    pub request_timeout: Duration,
    pub build_timeout: Duration,
    pub stop_grace_seconds: u32,
    pub readiness: ReadinessConfig,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2375".into(),
            api_version: "v1.43".into(),
            public_host: "localhost".into(),
            request_timeout: Duration::from_secs(30),
            build_timeout: Duration::from_secs(600),
            stop_grace_seconds: 10,
            readiness: ReadinessConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedContainer {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    state: ContainerState,
    #[serde(default)]
    config: ContainerConfig,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    host_port: String,
}

impl ContainerInspect {
    fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.as_ref()?.get(key).map(String::as_str)
    }

    fn env_value(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}=");
        self.config
            .env
            .as_ref()?
            .iter()
            .find_map(|kv| kv.strip_prefix(prefix.as_str()))
    }

    fn container_port(&self) -> RuntimeResult<u16> {
        self.label(LABEL_PORT)
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| {
                RuntimeError::Invalid(format!(
                    "container {} has no {LABEL_PORT} label",
                    self.id
                ))
            })
    }

    fn host_port(&self, container_port: u16) -> RuntimeResult<u16> {
        let key = format!("{container_port}/tcp");
        self.network_settings
            .ports
            .as_ref()
            .and_then(|ports| ports.get(&key))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|b| b.host_port.parse().ok())
            .ok_or_else(|| {
                RuntimeError::Invalid(format!(
                    "container {} does not publish {key}",
                    self.id
                ))
            })
    }
}

/// Runtime gateway backed by a Docker Engine.
pub struct DockerRuntime {
    client: Client,
    config: DockerConfig,
}

impl DockerRuntime {
    pub fn new(config: DockerConfig) -> RuntimeResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| RuntimeError::Invalid(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/{}{}",
            self.config.url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    fn endpoint(&self, host_port: u16) -> String {
        format!("http://{}:{host_port}", self.config.public_host)
    }

    /// Pass through successes and any status listed in `accept`.
    async fn check(resp: Response, accept: &[StatusCode]) -> RuntimeResult<Response> {
        let status = resp.status();
        if status.is_success() || accept.contains(&status) {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);
        Err(RuntimeError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn inspect(&self, id_or_name: &str) -> RuntimeResult<Option<ContainerInspect>> {
        let resp = self
            .client
            .get(self.api(&format!("/containers/{id_or_name}/json")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp, &[]).await?;
        Ok(Some(resp.json().await?))
    }

    async fn require(&self, handle: &str) -> RuntimeResult<ContainerInspect> {
        self.inspect(handle)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("container {handle}")))
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let (name, tag) = split_image(image);
        info!(%image, "pulling image");
        let resp = self
            .client
            .post(self.api("/images/create"))
            .query(&[("fromImage", name), ("tag", tag)])
            .timeout(self.config.build_timeout)
            .send()
            .await?;
        let resp = Self::check(resp, &[]).await?;
        let body = resp.text().await?;
        match stream_error(&body) {
            Some(message) => Err(RuntimeError::Api {
                status: 500,
                message: format!("pull {image}: {message}"),
            }),
            None => Ok(()),
        }
    }

    /// Create a container, pulling the image once if it is missing. A
    /// container that already exists under `name` is reused.
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        body: &Value,
    ) -> RuntimeResult<String> {
        let mut pulled = false;
        loop {
            let resp = self
                .client
                .post(self.api("/containers/create"))
                .query(&[("name", name)])
                .json(body)
                .send()
                .await?;
            match resp.status() {
                StatusCode::NOT_FOUND if !pulled => {
                    self.pull_image(image).await?;
                    pulled = true;
                }
                StatusCode::CONFLICT => {
                    debug!(%name, "container exists, reusing");
                    return Ok(self.require(name).await?.id);
                }
                _ => {
                    let resp = Self::check(resp, &[]).await?;
                    let created: CreatedContainer = resp.json().await?;
                    return Ok(created.id);
                }
            }
        }
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let resp = self
            .client
            .post(self.api(&format!("/containers/{id}/start")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RuntimeError::NotFound(format!("container {id}")));
        }
        Self::check(resp, &[StatusCode::NOT_MODIFIED]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        let grace = self.config.stop_grace_seconds;
        let resp = self
            .client
            .post(self.api(&format!("/containers/{id}/stop")))
            .query(&[("t", grace)])
            .timeout(self.config.request_timeout + Duration::from_secs(grace as u64))
            .send()
            .await?;
        Self::check(resp, &[StatusCode::NOT_MODIFIED, StatusCode::NOT_FOUND]).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let resp = self
            .client
            .delete(self.api(&format!("/containers/{id}")))
            .query(&[("force", "true"), ("v", "false")])
            .send()
            .await?;
        // 409: removal already in progress
        Self::check(resp, &[StatusCode::NOT_FOUND, StatusCode::CONFLICT]).await?;
        Ok(())
    }

    /// Resolve the published endpoint and wait for the health probe.
    async fn await_endpoint(&self, id: &str) -> RuntimeResult<(ContainerInspect, String)> {
        let info = self.require(id).await?;
        let host_port = info.host_port(info.container_port()?)?;
        let endpoint = self.endpoint(host_port);
        let health = info.label(LABEL_HEALTH_PATH).unwrap_or("/");
        wait_until_ready(
            &self.client,
            &format!("{endpoint}{health}"),
            &self.config.readiness,
        )
        .await?;
        Ok((info, endpoint))
    }

    /// Start `id` and wait for readiness, removing it when it never comes up.
    async fn start_or_discard(&self, id: &str) -> RuntimeResult<(ContainerInspect, String)> {
        let started = match self.start_container(id).await {
            Ok(()) => self.await_endpoint(id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &started {
            warn!(%id, error = %e, "container failed to become ready, removing");
            if let Err(cleanup) = self.remove_container(id).await {
                warn!(%id, error = %cleanup, "cleanup after failed start");
            }
        }
        started
    }

    async fn build_image(&self, artifact: &ServingArtifact) -> RuntimeResult<()> {
        let context = build_context(artifact)?;
        info!(tag = %artifact.image_tag, family = ?artifact.family, "building image");
        let resp = self
            .client
            .post(self.api("/build"))
            .query(&[
                ("t", artifact.image_tag.as_str()),
                ("rm", "true"),
                ("forcerm", "true"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(context)
            .timeout(self.config.build_timeout)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(RuntimeError::Build(message));
        }
        if let Some(message) = stream_error(&body) {
            return Err(RuntimeError::Build(message));
        }
        Ok(())
    }
}

fn split_image(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(i) if !image[i..].contains('/') => (&image[..i], &image[i + 1..]),
        _ => (image, "latest"),
    }
}

/// First `error` entry of a JSON-lines progress stream.
fn stream_error(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
}

fn gpu_requests() -> Value {
    json!([{ "Driver": "nvidia", "Count": -1, "Capabilities": [["gpu"]] }])
}

fn sandbox_body(spec: &SandboxSpec) -> Value {
    let mut env: Vec<String> = spec
        .env
        .iter()
        .map(|e| format!("{}={}", e.name, e.value))
        .collect();
    let mut labels: HashMap<String, String> = spec.labels.clone().into_iter().collect();
    labels.insert(LABEL_MANAGED.into(), "true".into());
    labels.insert(LABEL_PORT.into(), spec.port.to_string());
    labels.insert(LABEL_HEALTH_PATH.into(), spec.health_path.clone());
    if let (Some(var), Some(token)) = (&spec.token_env, &spec.access_token) {
        env.push(format!("{var}={token}"));
        labels.insert(LABEL_TOKEN_ENV.into(), var.clone());
    }
    let port_key = format!("{}/tcp", spec.port);
    let mut host = json!({
        "PortBindings": { port_key.clone(): [{ "HostPort": "" }] },
        "Memory": spec.memory_gb as i64 * 1024 * 1024 * 1024,
        "NanoCpus": spec.cpu_cores as i64 * 1_000_000_000,
    });
    if let Some(volume) = &spec.volume {
        host["Binds"] = json!([format!("{}:{}", volume.name, volume.target)]);
    }
    if spec.gpu {
        host["DeviceRequests"] = gpu_requests();
    }
    json!({
        "Image": spec.image,
        "Env": env,
        "Labels": labels,
        "ExposedPorts": { port_key: {} },
        "HostConfig": host,
    })
}

fn service_body(artifact: &ServingArtifact) -> Value {
    let env: Vec<String> = artifact
        .env
        .iter()
        .map(|e| format!("{}={}", e.name, e.value))
        .collect();
    let contract = &artifact.contract;
    let mut labels: HashMap<String, String> = artifact.labels.clone().into_iter().collect();
    labels.insert(LABEL_MANAGED.into(), "true".into());
    labels.insert(LABEL_PORT.into(), contract.port.to_string());
    labels.insert(LABEL_HEALTH_PATH.into(), contract.health_path.clone());
    let mount = &artifact.model_mount;
    let bind = if mount.read_only {
        format!("{}:{}:ro", mount.source, mount.target)
    } else {
        format!("{}:{}", mount.source, mount.target)
    };
    let port_key = format!("{}/tcp", contract.port);
    let mut host = json!({
        "PortBindings": { port_key.clone(): [{ "HostPort": "" }] },
        "Binds": [bind],
        "RestartPolicy": { "Name": "unless-stopped" },
    });
    if artifact.gpu {
        host["DeviceRequests"] = gpu_requests();
    }
    json!({
        "Image": artifact.image_tag,
        "Env": env,
        "Labels": labels,
        "ExposedPorts": { port_key: {} },
        "HostConfig": host,
    })
}

#[async_trait]
impl RuntimeGateway for DockerRuntime {
    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn provision_sandbox(&self, spec: &SandboxSpec) -> RuntimeResult<SandboxInfo> {
        let body = sandbox_body(spec);
        let id = self.create_container(&spec.name, &spec.image, &body).await?;
        let (_, endpoint) = self.start_or_discard(&id).await?;
        info!(%id, %endpoint, "sandbox ready");
        Ok(SandboxInfo {
            endpoint: access_url(&endpoint, spec.access_token.as_deref()),
            handle: id,
        })
    }

    #[instrument(skip(self))]
    async fn start_sandbox(&self, handle: &str) -> RuntimeResult<String> {
        self.start_container(handle).await?;
        let (info, endpoint) = match self.await_endpoint(handle).await {
            Ok(ready) => ready,
            Err(e) => {
                warn!(%handle, error = %e, "sandbox failed to become ready, stopping");
                if let Err(cleanup) = self.stop_container(handle).await {
                    warn!(%handle, error = %cleanup, "cleanup after failed start");
                }
                return Err(e);
            }
        };
        let token = info
            .label(LABEL_TOKEN_ENV)
            .and_then(|var| info.env_value(var));
        Ok(access_url(&endpoint, token))
    }

    #[instrument(skip(self))]
    async fn stop_sandbox(&self, handle: &str) -> RuntimeResult<()> {
        self.stop_container(handle).await
    }

    #[instrument(skip(self))]
    async fn remove_sandbox(&self, handle: &str) -> RuntimeResult<()> {
        self.remove_container(handle).await
    }

    #[instrument(skip(self, artifact), fields(name = %artifact.name, tag = %artifact.image_tag))]
    async fn build_and_run_service(
        &self,
        artifact: &ServingArtifact,
    ) -> RuntimeResult<ServiceInfo> {
        self.build_image(artifact).await?;
        let body = service_body(artifact);
        let id = self
            .create_container(&artifact.name, &artifact.image_tag, &body)
            .await?;
        let (_, endpoint) = self.start_or_discard(&id).await?;
        info!(%id, %endpoint, "service ready");
        Ok(ServiceInfo {
            handle: id,
            endpoint,
        })
    }

    #[instrument(skip(self))]
    async fn stop_service(&self, handle: &str) -> RuntimeResult<()> {
        self.stop_container(handle).await?;
        self.remove_container(handle).await
    }

    #[instrument(skip(self))]
    async fn scale_service(&self, handle: &str, bounds: ScalingBounds) -> RuntimeResult<()> {
        if bounds.min_instances > 1 {
            return Err(RuntimeError::Unsupported(format!(
                "single-container runtime cannot hold {} instances",
                bounds.min_instances
            )));
        }
        self.require(handle).await?;
        debug!(?bounds, "scaling bounds recorded");
        Ok(())
    }

    async fn proxy_request(
        &self,
        url: &str,
        credential: &str,
        payload: &Value,
        timeout: Duration,
    ) -> RuntimeResult<Value> {
        let resp = self
            .client
            .post(url)
            .header("X-API-Key", credential)
            .json(payload)
            .timeout(timeout)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    ["detail", "error", "message"]
                        .iter()
                        .find_map(|k| v.get(*k).map(|m| match m {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }))
                })
                .unwrap_or(text);
            return Err(RuntimeError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&text).map_err(|e| RuntimeError::Upstream {
            status: status.as_u16(),
            message: format!("response is not JSON: {e}"),
        })
    }

    async fn service_endpoint(&self, handle: &str) -> RuntimeResult<String> {
        let info = self.require(handle).await?;
        let host_port = info.host_port(info.container_port()?)?;
        Ok(self.endpoint(host_port))
    }

    async fn inspect_status(&self, handle: &str) -> RuntimeResult<RuntimeStatus> {
        Ok(match self.inspect(handle).await? {
            Some(info) => RuntimeStatus::from_state(&info.state.status),
            None => RuntimeStatus::NotFound,
        })
    }

    async fn fetch_logs(&self, handle: &str, tail: usize) -> RuntimeResult<String> {
        let resp = self
            .client
            .get(self.api(&format!("/containers/{handle}/logs")))
            .query(&[
                ("stdout", "true".to_string()),
                ("stderr", "true".to_string()),
                ("tail", tail.to_string()),
            ])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RuntimeError::NotFound(format!("container {handle}")));
        }
        let resp = Self::check(resp, &[]).await?;
        let raw = resp.bytes().await?;
        Ok(demux_log_stream(&raw))
    }
}
