//! Registry of the weights each model type runs on.

use edgepool_abstraction::ModelType;
use std::collections::BTreeMap;
use tracing::debug;

use crate::cache::ModelMetadata;

/// Maps each model type to the weights its backend loads.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: BTreeMap<ModelType, ModelMetadata>,
}

impl ModelCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the weights for a model type, returning the previous entry.
    pub fn register(&mut self, metadata: ModelMetadata) -> Option<ModelMetadata> {
        debug!(model_type = %metadata.model_type, model_id = %metadata.model_id, "Registered model weights");
        self.models.insert(metadata.model_type, metadata)
    }

    /// The weights registered for `model_type`.
    #[must_use]
    pub fn get(&self, model_type: ModelType) -> Option<&ModelMetadata> {
        self.models.get(&model_type)
    }

    /// All registered entries, ordered by model type.
    #[must_use]
    pub fn entries(&self) -> Vec<&ModelMetadata> {
        self.models.values().collect()
    }

    /// Number of registered model types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<ModelMetadata> for ModelCatalog {
    fn from_iter<I: IntoIterator<Item = ModelMetadata>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for metadata in iter {
            catalog.register(metadata);
        }
        catalog
    }
}
