//! Backend factory wiring the catalog, the weight cache and an engine.

use edgepool_abstraction::{BackendFactory, InferenceBackend, ModelType, UnitError, UnitResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::backend::{CachedWeightsBackend, Engine, StepEngine};
use crate::cache::WeightCache;
use crate::catalog::ModelCatalog;

type EngineBuilder = dyn Fn(ModelType) -> Box<dyn Engine> + Send + Sync;

/// Creates [`CachedWeightsBackend`]s for the model types the catalog knows.
#[derive(Clone)]
pub struct WeightedBackendFactory {
    cache: Arc<WeightCache>,
    catalog: Arc<ModelCatalog>,
    engines: Arc<EngineBuilder>,
}

impl WeightedBackendFactory {
    /// Creates a factory building engines with `engines`.
    pub fn new<E>(cache: Arc<WeightCache>, catalog: Arc<ModelCatalog>, engines: E) -> Self
    where
        E: Fn(ModelType) -> Box<dyn Engine> + Send + Sync + 'static,
    {
        Self { cache, catalog, engines: Arc::new(engines) }
    }

    /// Creates a factory whose backends run [`StepEngine`]s.
    #[must_use]
    pub fn with_step_engines(
        cache: Arc<WeightCache>,
        catalog: Arc<ModelCatalog>,
        steps: u64,
        step_delay: Duration,
    ) -> Self {
        Self::new(cache, catalog, move |_| Box::new(StepEngine::new(steps, step_delay)))
    }

    /// The weight cache backends load from.
    #[must_use]
    pub fn cache(&self) -> &Arc<WeightCache> {
        &self.cache
    }
}

impl std::fmt::Debug for WeightedBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedBackendFactory")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl BackendFactory for WeightedBackendFactory {
    fn create(&self, model_type: ModelType) -> UnitResult<Box<dyn InferenceBackend>> {
        let metadata = self
            .catalog
            .get(model_type)
            .cloned()
            .ok_or_else(|| UnitError::Unsupported(format!("no weights registered for {model_type}")))?;

        debug!(model_type = %model_type, model_id = %metadata.model_id, "Creating cached-weights backend");
        let engine = (self.engines)(model_type);
        Ok(Box::new(CachedWeightsBackend::new(model_type, Arc::clone(&self.cache), metadata, engine)))
    }
}
