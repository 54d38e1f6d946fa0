use mlp_models::{
    Deployment, DeploymentStatus, Money, ScalingBounds, UsageRecord,
    UsageResourceType,
};
use serde::{Deserialize, Serialize};

/// Cost and duration accumulated for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostByType {
    pub resource_type: UsageResourceType,
    #[serde(rename = "total_cost_micros")]
    pub total_cost: Money,
    pub total_duration_ms: u64,
    pub total_duration_minutes: f64,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingSummary {
    #[serde(rename = "current_month_cost_micros")]
    pub current_month_cost: Money,
    #[serde(rename = "total_cost_micros")]
    pub total_cost: Money,
    /// Records started this calendar month.
    pub usage_records: Vec<UsageRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiCallStats {
    pub total_calls: usize,
    pub successful_calls: usize,
    pub avg_response_time_ms: f64,
    /// Percentage in 0..=100.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingStats {
    pub usage_by_type: Vec<CostByType>,
    pub api_stats: ApiCallStats,
}

/// Outcome of a scale request. Bounds are persisted even when the runtime
/// could not apply them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleResponse {
    pub deployment_id: String,
    pub scaling: ScalingBounds,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogsResponse {
    pub id: String,
    pub tail: usize,
    pub logs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResponse {
    pub deployment_id: String,
    pub response_time_ms: u64,
    /// False when the call was served but its charge could not be recorded.
    pub billed: bool,
    pub result: serde_json::Value,
}

/// Deployment as shown to its owner. The API key is only revealed once, at
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentView {
    pub id: String,
    pub name: String,
    pub model_id: String,
    pub endpoint_path: String,
    pub status: DeploymentStatus,
    pub instance_type: String,
    pub auto_scaling: bool,
    #[serde(flatten)]
    pub scaling: ScalingBounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl DeploymentView {
    pub fn with_key(deployment: Deployment) -> Self {
        let key = deployment.api_key.clone();
        let mut view = Self::from(deployment);
        view.api_key = Some(key);
        view
    }
}

impl From<Deployment> for DeploymentView {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id,
            name: d.name,
            model_id: d.model_id,
            endpoint_path: d.endpoint_path,
            status: d.status,
            instance_type: d.instance_type,
            auto_scaling: d.auto_scaling,
            scaling: d.scaling,
            api_key: None,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub records: Vec<UsageRecord>,
    pub summary: BillingSummary,
}
