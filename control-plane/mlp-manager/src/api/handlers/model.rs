use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    api::Caller,
    errors::ApiError,
    models::{ModelDescriptor, ModelSpec},
    server::AppState,
};

pub async fn list_models(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<ModelDescriptor>>, ApiError> {
    Ok(Json(state.model_service.list(&user).await?))
}

pub async fn register_model(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(spec): Json<ModelSpec>,
) -> Result<(StatusCode, Json<ModelDescriptor>), ApiError> {
    let model = state.model_service.register(&user, spec).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

pub async fn get_model(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<Json<ModelDescriptor>, ApiError> {
    Ok(Json(state.model_service.get(&user, &id).await?))
}
