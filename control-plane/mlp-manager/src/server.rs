use crate::{
    api::{create_middleware_stack, handlers},
    clock::Clock,
    config::ServerConfig,
    services::{DeploymentService, ModelService, NotebookService, UsageAccrualEngine},
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub notebook_service: Arc<NotebookService>,
    pub deployment_service: Arc<DeploymentService>,
    pub model_service: Arc<ModelService>,
    pub accrual: Arc<UsageAccrualEngine>,
    pub clock: Arc<dyn Clock>,
}

pub struct ApiServer {
    app: Router,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        let app = Router::new()
            // Notebooks
            .route(
                "/api/v1/notebooks",
                get(handlers::list_notebooks).post(handlers::create_notebook),
            )
            .route(
                "/api/v1/notebooks/{id}",
                get(handlers::get_notebook).delete(handlers::delete_notebook),
            )
            .route("/api/v1/notebooks/{id}/start", post(handlers::start_notebook))
            .route("/api/v1/notebooks/{id}/stop", post(handlers::stop_notebook))
            .route("/api/v1/notebooks/{id}/logs", get(handlers::notebook_logs))
            // Model registry
            .route(
                "/api/v1/models",
                get(handlers::list_models).post(handlers::register_model),
            )
            .route("/api/v1/models/{id}", get(handlers::get_model))
            // Deployments
            .route(
                "/api/v1/deployments",
                get(handlers::list_deployments).post(handlers::create_deployment),
            )
            .route(
                "/api/v1/deployments/{id}",
                get(handlers::get_deployment).delete(handlers::delete_deployment),
            )
            .route(
                "/api/v1/deployments/{id}/scale",
                post(handlers::scale_deployment),
            )
            .route("/api/predict/{token}", post(handlers::predict))
            // Billing
            .route("/api/v1/billing/usage", get(handlers::usage_report))
            .route("/api/v1/billing/stats", get(handlers::billing_stats))
            .route("/api/v1/billing/pricing", get(handlers::pricing))
            .route("/health", get(health_check))
            .layer(create_middleware_stack(config.request_timeout))
            .with_state(state);

        Self { app, config }
    }

    /// Serve until ctrl-c, SIGTERM or `token` is cancelled. The token is
    /// cancelled on the way out so background jobs stop with the server.
    pub async fn serve(self, token: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind((
            self.config.host.as_str(),
            self.config.port,
        ))
        .await?;
        let addr = listener.local_addr()?;

        info!("Resource manager API listening on {}", addr);
        info!("Health check available at: http://{}/health", addr);

        let shutdown = token.clone();
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => info!("shutdown signal received"),
                    _ = shutdown.cancelled() => {}
                }
                shutdown.cancel();
            })
            .await?;

        Ok(())
    }

    /// Consume and return the underlying Axum Router so callers can drive it
    /// directly, e.g. with `tower::ServiceExt::oneshot` in tests.
    pub fn into_router(self) -> Router {
        self.app
    }
}

async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let checks = [
        state.notebook_service.health().await,
        state.deployment_service.health().await,
        state.accrual.health().await,
    ];
    let failure = checks.into_iter().find_map(Result::err);
    let (code, status, storage) = match &failure {
        None => (StatusCode::OK, "healthy", "ok".to_string()),
        Some(e) => {
            warn!(error = %e, "storage health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", e.to_string())
        }
    };
    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "mlp-manager",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": storage,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
