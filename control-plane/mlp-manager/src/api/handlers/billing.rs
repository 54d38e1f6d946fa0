use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    api::Caller,
    errors::ApiError,
    models::{BillingStats, PricingTable, UsageReport},
    server::AppState,
};

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub since: Option<DateTime<Utc>>,
}

pub async fn usage_report(
    State(state): State<AppState>,
    Caller(user): Caller,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageReport>, ApiError> {
    let now = state.clock.now();
    let summary = state.accrual.billing_summary(&user, now).await?;
    let records = match query.since {
        Some(since) => state.accrual.usage_since(&user, since).await?,
        None => summary.usage_records.clone(),
    };
    Ok(Json(UsageReport {
        since: query.since,
        records,
        summary,
    }))
}

pub async fn billing_stats(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<BillingStats>, ApiError> {
    let usage_by_type = state.accrual.cost_by_type(&user).await?;
    let api_stats = state.deployment_service.call_stats(&user).await?;
    Ok(Json(BillingStats {
        usage_by_type,
        api_stats,
    }))
}

pub async fn pricing() -> Json<PricingTable> {
    Json(PricingTable::current())
}
