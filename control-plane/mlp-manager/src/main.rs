use anyhow::Result;
use clap::Command;
use mlp_manager::{bootstrap::build_components, config::AppConfig, services::join_jobs};
use mlp_observability::setup_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _matches = Command::new("mlp-manager")
        .about("Notebook and model-serving lifecycle manager with usage metering")
        .version(env!("CARGO_PKG_VERSION"))
        .get_matches();

    let config = AppConfig::load_from_env()?;
    setup_tracing(config.tracing())?;

    info!("Starting resource manager with environment-based config");
    let components = build_components(&config).await?;

    let token = CancellationToken::new();
    let jobs = if components.scheduler_config.enabled {
        components.scheduler.spawn(token.clone())
    } else {
        info!("reconciliation scheduler disabled");
        Vec::new()
    };

    let server = components.api_server();
    let result = server.serve(token.clone()).await;
    token.cancel();
    let crashed = join_jobs(jobs).await;
    if crashed > 0 {
        warn!(crashed, "reconciliation jobs did not shut down cleanly");
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("shutdown complete");
    Ok(())
}
