use mlp_models::{ModelDescriptor, ModelSpec};
use mlp_storage::ModelStorage;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::clock::Clock;
use crate::errors::LifecycleError;
use crate::services::ids;

/// Minimal model registry backing deployment creation.
pub struct ModelService {
    storage: Arc<dyn ModelStorage>,
    clock: Arc<dyn Clock>,
}

impl ModelService {
    pub fn new(storage: Arc<dyn ModelStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub async fn register(
        &self,
        owner: &str,
        spec: ModelSpec,
    ) -> Result<ModelDescriptor, LifecycleError> {
        spec.validate()?;
        let model = ModelDescriptor::new(
            ids::resource_id(),
            owner.to_string(),
            spec,
            self.clock.now(),
        );
        self.storage.store_model(&model).await?;
        info!(model = %model.id, owner, framework = %model.framework, "model registered");
        Ok(model)
    }

    pub async fn get(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<ModelDescriptor, LifecycleError> {
        let model = self
            .storage
            .get_model(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("model {id}")))?;
        if model.owner_id != owner {
            return Err(LifecycleError::forbidden(format!(
                "model {id} belongs to another user"
            )));
        }
        Ok(model)
    }

    pub async fn list(
        &self,
        owner: &str,
    ) -> Result<Vec<ModelDescriptor>, LifecycleError> {
        Ok(self.storage.list_models(owner).await?)
    }

    /// The model must exist, belong to `owner` and be ready to serve.
    pub async fn get_ready_model(
        &self,
        id: &str,
        owner: &str,
    ) -> Result<ModelDescriptor, LifecycleError> {
        let model = self.get(owner, id).await?;
        if !model.is_ready() {
            return Err(LifecycleError::Validation(format!(
                "model {id} is not ready (status: {})",
                model.status
            )));
        }
        Ok(model)
    }
}
