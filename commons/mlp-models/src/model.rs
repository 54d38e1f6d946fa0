use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::enums::ModelStatus;

/// Registration request for a trained model artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct ModelSpec {
    #[validate(length(min = 1, max = 128, message = "Model name must be 1-128 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "Framework cannot be empty"))]
    pub framework: String,
    #[serde(default)]
    pub framework_version: Option<String>,
    #[validate(length(min = 1, message = "Artifact path cannot be empty"))]
    pub artifact_path: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub status: ModelStatus,
}

/// Model registry record as seen by the deployment manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    /// Raw framework tag; parsed into a family at synthesis time.
    pub framework: String,
    pub framework_version: Option<String>,
    pub artifact_path: String,
    pub requirements: Vec<String>,
    pub status: ModelStatus,
    pub created_at: DateTime<Utc>,
}

impl ModelDescriptor {
    pub fn new(
        id: String,
        owner_id: String,
        spec: ModelSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: spec.name,
            owner_id,
            framework: spec.framework,
            framework_version: spec.framework_version,
            artifact_path: spec.artifact_path,
            requirements: spec.requirements,
            status: spec.status,
            created_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Ready
    }
}
