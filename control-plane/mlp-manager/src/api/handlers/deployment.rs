use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::Value;
use tracing::info;

use crate::{
    api::{ApiKey, Caller},
    errors::ApiError,
    models::{
        DeploymentSpec, DeploymentView, PredictionResponse, ScaleResponse,
        ScalingBounds,
    },
    server::AppState,
};

pub async fn list_deployments(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<DeploymentView>>, ApiError> {
    let deployments = state.deployment_service.list(&user).await?;
    Ok(Json(deployments.into_iter().map(DeploymentView::from).collect()))
}

/// The response is the only place the API key is ever returned.
pub async fn create_deployment(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(spec): Json<DeploymentSpec>,
) -> Result<(StatusCode, Json<DeploymentView>), ApiError> {
    info!(user = %user, model = %spec.model_id, "API: creating deployment");
    let deployment = state.deployment_service.create(&user, spec).await?;
    Ok((StatusCode::CREATED, Json(DeploymentView::with_key(deployment))))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<Json<DeploymentView>, ApiError> {
    let deployment = state.deployment_service.get(&user, &id).await?;
    Ok(Json(deployment.into()))
}

pub async fn delete_deployment(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.deployment_service.delete(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn scale_deployment(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
    Json(bounds): Json<ScalingBounds>,
) -> Result<Json<ScaleResponse>, ApiError> {
    Ok(Json(state.deployment_service.scale(&user, &id, bounds).await?))
}

pub async fn predict(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ApiKey(key): ApiKey,
    Json(payload): Json<Value>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let endpoint_path = format!("/api/predict/{token}");
    let response = state
        .deployment_service
        .predict(&endpoint_path, key.as_deref(), payload)
        .await?;
    Ok(Json(response))
}
