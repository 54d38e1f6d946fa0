use anyhow::Result;
use envconfig::Envconfig;
use mlp_observability::TracingConfig;
use mlp_runtime::{DockerConfig, ReadinessConfig};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Envconfig)]
pub struct AppConfig {
    // Server configuration
    #[envconfig(from = "SERVER_HOST", default = "0.0.0.0")]
    pub server_host: String,

    #[envconfig(from = "SERVER_PORT", default = "8080")]
    pub server_port: u16,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "180")]
    pub request_timeout_seconds: u64,

    // Storage configuration
    #[envconfig(from = "STORAGE_TYPE", default = "memory")]
    pub storage_type: String,

    // Runtime configuration
    #[envconfig(from = "RUNTIME_TYPE", default = "docker")]
    pub runtime_type: String,

    #[envconfig(from = "DOCKER_URL", default = "http://localhost:2375")]
    pub docker_url: String,

    #[envconfig(from = "DOCKER_API_VERSION", default = "v1.43")]
    pub docker_api_version: String,

    #[envconfig(from = "RUNTIME_PUBLIC_HOST", default = "localhost")]
    pub runtime_public_host: String,

    #[envconfig(from = "RUNTIME_REQUEST_TIMEOUT", default = "30")]
    pub runtime_request_timeout_seconds: u64,

    #[envconfig(from = "BUILD_TIMEOUT", default = "600")]
    pub build_timeout_seconds: u64,

    // Readiness probing
    #[envconfig(from = "READINESS_TIMEOUT", default = "60")]
    pub readiness_timeout_seconds: u64,

    #[envconfig(from = "READINESS_INTERVAL_MS", default = "2000")]
    pub readiness_interval_ms: u64,

    #[envconfig(from = "READINESS_PROBE_TIMEOUT", default = "5")]
    pub readiness_probe_timeout_seconds: u64,

    // Notebook images
    #[envconfig(
        from = "NOTEBOOK_CPU_IMAGE",
        default = "jupyter/datascience-notebook:python-3.10"
    )]
    pub notebook_cpu_image: String,

    #[envconfig(
        from = "NOTEBOOK_GPU_IMAGE",
        default = "jupyter/tensorflow-notebook:python-3.10"
    )]
    pub notebook_gpu_image: String,

    // Predictions
    #[envconfig(from = "PREDICT_TIMEOUT", default = "30")]
    pub predict_timeout_seconds: u64,

    // Scheduler
    #[envconfig(from = "SCHEDULER_ENABLED", default = "true")]
    pub scheduler_enabled: bool,

    #[envconfig(from = "IDLE_RETENTION_HOURS", default = "24")]
    pub idle_retention_hours: u64,

    #[envconfig(from = "RECLAIM_INTERVAL", default = "300")]
    pub reclaim_interval_seconds: u64,

    #[envconfig(from = "COST_REFRESH_INTERVAL", default = "3600")]
    pub cost_refresh_interval_seconds: u64,

    #[envconfig(from = "RECONCILE_INTERVAL", default = "120")]
    pub reconcile_interval_seconds: u64,

    #[envconfig(from = "STALE_GRACE_PERIOD", default = "600")]
    pub stale_grace_period_seconds: u64,

    // Logging
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    #[envconfig(from = "LOG_FORMAT", default = "plain")]
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables only
    pub fn load_from_env() -> Result<Self> {
        Ok(Self::init_from_env()?)
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            host: self.server_host.clone(),
            port: self.server_port,
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
        }
    }

    pub fn storage(&self) -> StorageConfig {
        let storage_type = match self.storage_type.to_lowercase().as_str() {
            "memory" => StorageType::Memory,
            other => {
                warn!(
                    "Unrecognized storage type '{}', falling back to 'memory'.",
                    other
                );
                StorageType::Memory
            }
        };
        StorageConfig { storage_type }
    }

    pub fn runtime(&self) -> RuntimeConfig {
        let runtime_type = match self.runtime_type.to_lowercase().as_str() {
            "docker" => RuntimeType::Docker,
            "memory" => RuntimeType::Memory,
            other => {
                warn!(
                    "Unrecognized runtime type '{}', falling back to 'docker'.",
                    other
                );
                RuntimeType::Docker
            }
        };
        RuntimeConfig {
            runtime_type,
            docker: DockerConfig {
                url: self.docker_url.clone(),
                api_version: self.docker_api_version.clone(),
                public_host: self.runtime_public_host.clone(),
                request_timeout: Duration::from_secs(
                    self.runtime_request_timeout_seconds,
                ),
                build_timeout: Duration::from_secs(self.build_timeout_seconds),
                stop_grace_seconds: 10,
                readiness: self.readiness(),
            },
        }
    }

    pub fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            timeout: Duration::from_secs(self.readiness_timeout_seconds),
            interval: Duration::from_millis(self.readiness_interval_ms),
            probe_timeout: Duration::from_secs(
                self.readiness_probe_timeout_seconds,
            ),
        }
    }

    pub fn notebook_policy(&self) -> NotebookPolicyConfig {
        NotebookPolicyConfig {
            cpu_image: self.notebook_cpu_image.clone(),
            gpu_image: self.notebook_gpu_image.clone(),
            ..Default::default()
        }
    }

    pub fn deployment_policy(&self) -> DeploymentPolicyConfig {
        DeploymentPolicyConfig {
            predict_timeout: Duration::from_secs(self.predict_timeout_seconds),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            enabled: self.scheduler_enabled,
            idle_retention: Duration::from_secs(self.idle_retention_hours * 3600),
            reclaim_interval: Duration::from_secs(self.reclaim_interval_seconds),
            cost_refresh_interval: Duration::from_secs(
                self.cost_refresh_interval_seconds,
            ),
            reconcile_interval: Duration::from_secs(
                self.reconcile_interval_seconds,
            ),
            stale_grace_period: Duration::from_secs(
                self.stale_grace_period_seconds,
            ),
        }
    }

    pub fn tracing(&self) -> TracingConfig {
        TracingConfig::new(
            "mlp-manager",
            &self.log_level,
            self.log_format.eq_ignore_ascii_case("json"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub storage_type: StorageType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageType {
    Memory,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub runtime_type: RuntimeType,
    pub docker: DockerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeType {
    Docker,
    Memory,
}

#[derive(Debug, Clone)]
pub struct NotebookPolicyConfig {
    pub cpu_image: String,
    pub gpu_image: String,
    /// Port Jupyter listens on inside the sandbox.
    pub port: u16,
    pub health_path: String,
    pub token_env: String,
    pub data_mount: String,
}

impl Default for NotebookPolicyConfig {
    fn default() -> Self {
        Self {
            cpu_image: "jupyter/datascience-notebook:python-3.10".into(),
            gpu_image: "jupyter/tensorflow-notebook:python-3.10".into(),
            port: 8888,
            health_path: "/api".into(),
            token_env: "JUPYTER_TOKEN".into(),
            data_mount: "/home/jovyan/work".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentPolicyConfig {
    pub predict_timeout: Duration,
}

impl Default for DeploymentPolicyConfig {
    fn default() -> Self {
        Self {
            predict_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub idle_retention: Duration,
    pub reclaim_interval: Duration,
    pub cost_refresh_interval: Duration,
    pub reconcile_interval: Duration,
    pub stale_grace_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_retention: Duration::from_secs(24 * 3600),
            reclaim_interval: Duration::from_secs(300),
            cost_refresh_interval: Duration::from_secs(3600),
            reconcile_interval: Duration::from_secs(120),
            stale_grace_period: Duration::from_secs(600),
        }
    }
}
