use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::cost::{GpuTier, RateClass};
use crate::enums::NotebookStatus;
use crate::usage::UsageMetadata;

fn default_cpu_cores() -> u32 {
    2
}

fn default_memory_gb() -> u32 {
    8
}

fn default_storage_gb() -> u32 {
    50
}

fn validate_gpu_type(gpu_type: &str) -> Result<(), ValidationError> {
    gpu_type
        .parse::<GpuTier>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("unknown_gpu_type"))
}

/// Requested shape of a notebook sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct NotebookSpec {
    #[validate(length(
        min = 1,
        max = 128,
        message = "Notebook name must be 1-128 characters"
    ))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_gpu_type"))]
    pub gpu_type: Option<String>,
    #[serde(default = "default_cpu_cores")]
    #[validate(range(min = 1, max = 64, message = "cpu_cores must be 1-64"))]
    pub cpu_cores: u32,
    #[serde(default = "default_memory_gb")]
    #[validate(range(min = 1, max = 512, message = "memory_gb must be 1-512"))]
    pub memory_gb: u32,
    #[serde(default = "default_storage_gb")]
    #[validate(range(min = 1, max = 2048, message = "storage_gb must be 1-2048"))]
    pub storage_gb: u32,
}

impl NotebookSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            gpu_type: None,
            cpu_cores: default_cpu_cores(),
            memory_gb: default_memory_gb(),
            storage_gb: default_storage_gb(),
        }
    }

    pub fn with_gpu(mut self, gpu_type: impl Into<String>) -> Self {
        self.gpu_type = Some(gpu_type.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub gpu_type: Option<String>,
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
    pub status: NotebookStatus,
    /// Container id, present while the runtime holds a container.
    pub runtime_handle: Option<String>,
    /// Present only while running.
    pub access_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Notebook {
    pub fn new(
        id: String,
        owner_id: String,
        spec: NotebookSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            owner_id,
            gpu_type: spec.gpu_type,
            cpu_cores: spec.cpu_cores,
            memory_gb: spec.memory_gb,
            storage_gb: spec.storage_gb,
            status: NotebookStatus::Creating,
            runtime_handle: None,
            access_url: None,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
            last_accessed: now,
        }
    }

    pub fn rate_class(&self) -> RateClass {
        RateClass::from_gpu_type(self.gpu_type.as_deref())
    }

    pub fn has_gpu(&self) -> bool {
        matches!(self.rate_class(), RateClass::Gpu(_))
    }

    pub fn set_status(&mut self, status: NotebookStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
        self.updated_at = now;
    }

    /// Snapshot of the billed resource class, stored on usage windows.
    pub fn usage_metadata(&self) -> UsageMetadata {
        UsageMetadata {
            gpu_type: self.gpu_type.clone(),
            cpu_cores: Some(self.cpu_cores),
            memory_gb: Some(self.memory_gb),
            instance_type: None,
        }
    }
}
