use mlp_manager::config::{AppConfig, RuntimeType, StorageType};
use serial_test::serial;
use std::env;
use std::time::Duration;

const VARS: &[&str] = &[
    "SERVER_HOST",
    "SERVER_PORT",
    "STORAGE_TYPE",
    "RUNTIME_TYPE",
    "PREDICT_TIMEOUT",
    "IDLE_RETENTION_HOURS",
    "RECLAIM_INTERVAL",
    "SCHEDULER_ENABLED",
    "LOG_LEVEL",
    "LOG_FORMAT",
];

fn clear_env() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn default_config_values() {
    clear_env();
    let config = AppConfig::load_from_env().expect("defaults should load");

    assert_eq!(config.server_host, "0.0.0.0");
    assert_eq!(config.server_port, 8080);
    assert_eq!(config.storage().storage_type, StorageType::Memory);
    assert_eq!(config.runtime().runtime_type, RuntimeType::Docker);

    let scheduler = config.scheduler();
    assert!(scheduler.enabled);
    assert_eq!(scheduler.idle_retention, Duration::from_secs(24 * 3600));
    assert_eq!(scheduler.reclaim_interval, Duration::from_secs(300));
    assert_eq!(scheduler.cost_refresh_interval, Duration::from_secs(3600));
    assert_eq!(scheduler.stale_grace_period, Duration::from_secs(600));

    assert_eq!(config.deployment_policy().predict_timeout, Duration::from_secs(30));
    let tracing = config.tracing();
    assert_eq!(tracing.service_name, "mlp-manager");
    assert!(!tracing.json_format);
}

#[test]
#[serial]
fn config_loading_from_env() {
    clear_env();
    unsafe {
        env::set_var("SERVER_HOST", "127.0.0.1");
        env::set_var("SERVER_PORT", "3000");
        env::set_var("RUNTIME_TYPE", "memory");
        env::set_var("PREDICT_TIMEOUT", "5");
        env::set_var("IDLE_RETENTION_HOURS", "48");
        env::set_var("SCHEDULER_ENABLED", "false");
        env::set_var("LOG_FORMAT", "JSON");
    }

    let config = AppConfig::load_from_env().expect("env config should load");
    assert_eq!(config.server().host, "127.0.0.1");
    assert_eq!(config.server().port, 3000);
    assert_eq!(config.runtime().runtime_type, RuntimeType::Memory);
    assert_eq!(config.deployment_policy().predict_timeout, Duration::from_secs(5));
    assert_eq!(config.scheduler().idle_retention, Duration::from_secs(48 * 3600));
    assert!(!config.scheduler().enabled);
    assert!(config.tracing().json_format);

    clear_env();
}

#[test]
#[serial]
fn unknown_backends_fall_back() {
    clear_env();
    unsafe {
        env::set_var("STORAGE_TYPE", "etcd");
        env::set_var("RUNTIME_TYPE", "kubernetes");
    }

    let config = AppConfig::load_from_env().expect("config should load");
    assert_eq!(config.storage().storage_type, StorageType::Memory);
    assert_eq!(config.runtime().runtime_type, RuntimeType::Docker);

    clear_env();
}

#[test]
#[serial]
fn malformed_port_is_rejected() {
    clear_env();
    unsafe {
        env::set_var("SERVER_PORT", "not-a-port");
    }
    assert!(AppConfig::load_from_env().is_err());
    clear_env();
}

#[tokio::test]
#[serial]
async fn components_build_with_memory_runtime() {
    clear_env();
    unsafe {
        env::set_var("RUNTIME_TYPE", "memory");
    }
    let config = AppConfig::load_from_env().expect("config should load");
    let components = mlp_manager::build_components(&config)
        .await
        .expect("components should build");
    assert!(components.state.notebook_service.health().await.is_ok());
    assert!(components.state.deployment_service.health().await.is_ok());
    clear_env();
}
