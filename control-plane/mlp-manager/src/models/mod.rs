pub mod responses;

pub use responses::*;

pub use mlp_models::{
    ApiCall, Deployment, DeploymentSpec, DeploymentStatus, ModelDescriptor,
    ModelSpec, ModelStatus, Money, Notebook, NotebookSpec, NotebookStatus,
    PricingTable, ScalingBounds, UsageRecord, UsageResourceType,
};
