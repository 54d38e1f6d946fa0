pub mod accrual;
pub mod artifact;
pub mod deployment;
pub mod ids;
pub mod locks;
pub mod model;
pub mod notebook;
pub mod reconcile;

pub use accrual::UsageAccrualEngine;
pub use deployment::DeploymentService;
pub use locks::ResourceLocks;
pub use model::ModelService;
pub use notebook::NotebookService;
pub use reconcile::{Job, ReconciliationScheduler, SweepReport, join_jobs};
