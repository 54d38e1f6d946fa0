use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    api::Caller,
    errors::ApiError,
    models::{LogsResponse, Notebook, NotebookSpec},
    server::AppState,
};

const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

pub async fn list_notebooks(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<Notebook>>, ApiError> {
    Ok(Json(state.notebook_service.list(&user).await?))
}

pub async fn create_notebook(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(spec): Json<NotebookSpec>,
) -> Result<(StatusCode, Json<Notebook>), ApiError> {
    info!(user = %user, name = %spec.name, "API: creating notebook");
    let notebook = state.notebook_service.create(&user, spec).await?;
    Ok((StatusCode::CREATED, Json(notebook)))
}

pub async fn get_notebook(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<Json<Notebook>, ApiError> {
    Ok(Json(state.notebook_service.get(&user, &id).await?))
}

pub async fn delete_notebook(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<Json<Notebook>, ApiError> {
    Ok(Json(state.notebook_service.delete(&user, &id).await?))
}

pub async fn start_notebook(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<Json<Notebook>, ApiError> {
    Ok(Json(state.notebook_service.start(&user, &id).await?))
}

pub async fn stop_notebook(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
) -> Result<Json<Notebook>, ApiError> {
    Ok(Json(state.notebook_service.stop(&user, &id).await?))
}

pub async fn notebook_logs(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let logs = state.notebook_service.logs(&user, &id, tail).await?;
    Ok(Json(LogsResponse { id, tail, logs }))
}
