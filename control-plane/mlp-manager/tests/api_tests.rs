// HTTP surface tests driven through the router with oneshot requests.
mod common;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use common::{ALICE, BOB, Harness};
use mlp_models::ModelStatus;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn health_endpoint() -> Result<()> {
    let h = Harness::new();
    let (status, body) = send(&h.router(), "GET", "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "mlp-manager");
    assert!(body["timestamp"].is_string());
    Ok(())
}

#[tokio::test]
async fn requests_without_user_are_unauthorized() -> Result<()> {
    let h = Harness::new();
    let (status, body) =
        send(&h.router(), "GET", "/api/v1/notebooks", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("X-User-Id"));
    Ok(())
}

#[tokio::test]
async fn notebook_endpoints() -> Result<()> {
    let h = Harness::new();
    let app = h.router();

    let (status, created) = send(
        &app,
        "POST",
        "/api/v1/notebooks",
        Some(ALICE),
        Some(json!({"name": "exploration", "cpu_cores": 4})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "running");
    assert_eq!(created["cpu_cores"], 4);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "GET", &format!("/api/v1/notebooks/{id}"), Some(BOB), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.minutes(30);
    let (status, stopped) = send(
        &app,
        "POST",
        &format!("/api/v1/notebooks/{id}/stop"),
        Some(ALICE),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "stopped");
    assert!(stopped["access_url"].is_null());

    let (status, logs) = send(
        &app,
        "GET",
        &format!("/api/v1/notebooks/{id}/logs?tail=5"),
        Some(ALICE),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["tail"], 5);

    let (status, listed) = send(&app, "GET", "/api/v1/notebooks", Some(ALICE), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        "GET",
        "/api/v1/notebooks/does-not-exist",
        Some(ALICE),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn invalid_notebook_is_bad_request() -> Result<()> {
    let h = Harness::new();
    let (status, body) = send(
        &h.router(),
        "POST",
        "/api/v1/notebooks",
        Some(ALICE),
        Some(json!({"name": "nb", "gpu_type": "a100"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn deploy_and_predict_over_http() -> Result<()> {
    let h = Harness::new();
    let app = h.router();

    let (status, model) = send(
        &app,
        "POST",
        "/api/v1/models",
        Some(ALICE),
        Some(json!({
            "name": "iris",
            "framework": "sklearn",
            "artifact_path": "/srv/models/iris.pkl",
            "status": "ready"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let model_id = model["id"].as_str().unwrap().to_string();

    let (status, deployment) = send(
        &app,
        "POST",
        "/api/v1/deployments",
        Some(ALICE),
        Some(json!({"name": "iris-svc", "model_id": model_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deployment["status"], "running");
    let api_key = deployment["api_key"].as_str().unwrap().to_string();
    let endpoint = deployment["endpoint_path"].as_str().unwrap().to_string();
    let id = deployment["id"].as_str().unwrap().to_string();

    // the key is only returned once
    let (_, fetched) = send(&app, "GET", &format!("/api/v1/deployments/{id}"), Some(ALICE), None).await?;
    assert!(fetched.get("api_key").is_none());

    let request = Request::builder()
        .method("POST")
        .uri(&endpoint)
        .header("content-type", "application/json")
        .header("x-api-key", &api_key)
        .body(Body::from(serde_json::to_vec(&json!({"features": [[1.0, 2.0]]}))?))?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let prediction: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(prediction["result"]["prediction"], json!([[1.0, 2.0]]));
    assert_eq!(prediction["billed"], true);

    let (status, _) = send(&app, "POST", &endpoint, None, Some(json!({"features": [1]}))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, stats) = send(&app, "GET", "/api/v1/billing/stats", Some(ALICE), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["api_stats"]["total_calls"], 2);
    assert_eq!(stats["api_stats"]["successful_calls"], 1);

    let (status, scaled) = send(
        &app,
        "POST",
        &format!("/api/v1/deployments/{id}/scale"),
        Some(ALICE),
        Some(json!({"min_instances": 0, "max_instances": 2})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scaled["applied"], true);

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/deployments/{id}"), Some(ALICE), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "POST", &endpoint, None, Some(json!({"features": [1]}))).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn deployment_of_unready_model_is_bad_request() -> Result<()> {
    let h = Harness::new();
    let model = h.model(ALICE, ModelStatus::Training).await;
    let (status, body) = send(
        &h.router(),
        "POST",
        "/api/v1/deployments",
        Some(ALICE),
        Some(json!({"name": "svc", "model_id": model.id})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not ready"));
    Ok(())
}

#[tokio::test]
async fn pricing_and_usage_report() -> Result<()> {
    let h = Harness::new();
    let app = h.router();

    let (status, pricing) = send(&app, "GET", "/api/v1/billing/pricing", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(pricing["notebooks"].is_object());
    assert!(pricing["deployments"].is_object());

    let nb = h
        .notebooks
        .create(ALICE, mlp_models::NotebookSpec::new("nb"))
        .await?;
    h.minutes(30);
    h.notebooks.stop(ALICE, &nb.id).await?;

    let (status, usage) = send(&app, "GET", "/api/v1/billing/usage", Some(ALICE), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["records"].as_array().unwrap().len(), 1);
    assert_eq!(usage["summary"]["total_cost_micros"], 150_000);

    let (_, other) = send(&app, "GET", "/api/v1/billing/usage", Some(BOB), None).await?;
    assert!(other["records"].as_array().unwrap().is_empty());
    Ok(())
}
