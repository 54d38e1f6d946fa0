use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::cost::ServingTier;
use crate::enums::DeploymentStatus;
use crate::usage::UsageMetadata;

fn default_min_instances() -> i32 {
    1
}

fn default_max_instances() -> i32 {
    5
}

fn default_instance_type() -> String {
    "cpu".to_string()
}

fn validate_bounds(bounds: &ScalingBounds) -> Result<(), ValidationError> {
    if bounds.min_instances > bounds.max_instances {
        let mut err = ValidationError::new("min_exceeds_max");
        err.message = Some("min_instances must not exceed max_instances".into());
        return Err(err);
    }
    Ok(())
}

/// Desired replica bounds. The runtime may lag behind these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[validate(schema(function = "validate_bounds"))]
pub struct ScalingBounds {
    #[serde(default = "default_min_instances")]
    #[validate(range(min = 0, message = "min_instances must be >= 0"))]
    pub min_instances: i32,
    #[serde(default = "default_max_instances")]
    #[validate(range(min = 0, message = "max_instances must be >= 0"))]
    pub max_instances: i32,
}

impl Default for ScalingBounds {
    fn default() -> Self {
        Self {
            min_instances: default_min_instances(),
            max_instances: default_max_instances(),
        }
    }
}

impl ScalingBounds {
    pub fn new(min_instances: i32, max_instances: i32) -> Self {
        Self {
            min_instances,
            max_instances,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct DeploymentSpec {
    #[validate(length(
        min = 1,
        max = 128,
        message = "Deployment name must be 1-128 characters"
    ))]
    pub name: String,
    #[validate(length(min = 1, message = "Model id cannot be empty"))]
    pub model_id: String,
    #[serde(default = "default_instance_type")]
    #[validate(length(min = 1, message = "Instance type cannot be empty"))]
    pub instance_type: String,
    #[serde(default)]
    pub auto_scaling: bool,
    #[serde(flatten)]
    #[validate(nested)]
    pub scaling: ScalingBounds,
}

impl DeploymentSpec {
    pub fn new(name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
            instance_type: default_instance_type(),
            auto_scaling: false,
            scaling: ScalingBounds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub model_id: String,
    /// Generated once at creation; immutable.
    pub endpoint_path: String,
    /// Generated once at creation; immutable.
    pub api_key: String,
    pub status: DeploymentStatus,
    pub instance_type: String,
    pub auto_scaling: bool,
    #[serde(flatten)]
    pub scaling: ScalingBounds,
    pub runtime_handle: Option<String>,
    pub service_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(
        id: String,
        owner_id: String,
        spec: DeploymentSpec,
        endpoint_path: String,
        api_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: spec.name,
            owner_id,
            model_id: spec.model_id,
            endpoint_path,
            api_key,
            status: DeploymentStatus::Deploying,
            instance_type: spec.instance_type,
            auto_scaling: spec.auto_scaling,
            scaling: spec.scaling,
            runtime_handle: None,
            service_url: None,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
        }
    }

    pub fn set_status(&mut self, status: DeploymentStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
        self.updated_at = now;
    }

    pub fn serving_tier(&self) -> ServingTier {
        ServingTier::from_instance_type(&self.instance_type)
    }

    pub fn wants_gpu(&self) -> bool {
        self.instance_type.to_ascii_lowercase().starts_with("gpu")
    }

    pub fn usage_metadata(&self) -> UsageMetadata {
        UsageMetadata {
            gpu_type: None,
            cpu_cores: None,
            memory_gb: None,
            instance_type: Some(self.instance_type.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_reject_min_above_max() {
        assert!(ScalingBounds::new(3, 2).validate().is_err());
        assert!(ScalingBounds::new(-1, 2).validate().is_err());
        assert!(ScalingBounds::new(0, 0).validate().is_ok());
    }

    #[test]
    fn spec_flattens_bounds_with_defaults() {
        let spec: DeploymentSpec =
            serde_json::from_str(r#"{"name":"d","model_id":"m"}"#).unwrap();
        assert_eq!(spec.scaling, ScalingBounds::new(1, 5));
        assert_eq!(spec.instance_type, "cpu");

        let spec: DeploymentSpec = serde_json::from_str(
            r#"{"name":"d","model_id":"m","min_instances":4,"max_instances":2}"#,
        )
        .unwrap();
        assert!(spec.validate().is_err());
    }
}
