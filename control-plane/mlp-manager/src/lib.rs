pub mod api;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod server;
pub mod services;
pub mod storage;

pub use config::*;
pub use errors::*;
pub use models::*;
pub use server::{ApiServer, AppState};
pub use storage::*;

pub use clock::{Clock, ManualClock, SystemClock};
pub use services::{
    DeploymentService, ModelService, NotebookService, ReconciliationScheduler,
    UsageAccrualEngine,
};

pub use api::create_middleware_stack;
pub use bootstrap::{build_api_server_from_env, build_components, build_components_with};
