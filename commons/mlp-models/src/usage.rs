use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cost::Money;
use crate::enums::UsageResourceType;

/// The resource a usage record is billed against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceRef {
    Notebook(String),
    Deployment(String),
}

impl ResourceRef {
    pub fn id(&self) -> &str {
        match self {
            ResourceRef::Notebook(id) | ResourceRef::Deployment(id) => id,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Notebook(id) => write!(f, "notebook/{id}"),
            ResourceRef::Deployment(id) => write!(f, "deployment/{id}"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

/// A billable interval. `end_time == None` marks an open window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub resource: ResourceRef,
    pub resource_type: UsageResourceType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(rename = "cost_micros")]
    pub cost: Money,
    pub metadata: UsageMetadata,
}

impl UsageRecord {
    pub fn open(
        id: String,
        user_id: String,
        resource: ResourceRef,
        resource_type: UsageResourceType,
        metadata: UsageMetadata,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            resource,
            resource_type,
            start_time,
            end_time: None,
            duration_ms: 0,
            cost: Money::ZERO,
            metadata,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_ms as f64 / 60_000.0
    }

    /// Milliseconds from the window start to `now`, zero if `now` is earlier.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.start_time).num_milliseconds()).unwrap_or(0)
    }
}

/// Telemetry for one prediction attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiCall {
    pub id: String,
    pub deployment_id: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
