//! Inference backends whose weights come from the weight cache.

use async_trait::async_trait;
use bytes::Bytes;
use edgepool_abstraction::{
    CancellationToken, InferenceBackend, InferenceMetadata, InferenceTask, ModelType,
    ProgressSink, UnitError, UnitOutput, UnitResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{LoadPhase, ModelMetadata, WeightCache};

/// The computation a backend runs once its weights are loaded.
///
/// Implementations own their acceleration context. `run` is expected to
/// check `cancel` at its iteration boundaries; a run that never checks it
/// completes normally even after cancellation was requested.
#[async_trait]
pub trait Engine: Send {
    /// Prepares the engine with the given weights.
    async fn load(&mut self, weights: Bytes, metadata: &ModelMetadata) -> UnitResult<()>;

    /// Runs one task.
    async fn run(
        &mut self,
        task: &InferenceTask,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> UnitResult<UnitOutput>;
}

/// Backend that pulls its weights from a [`WeightCache`] and hands them to an [`Engine`].
///
/// Weights are loaded during initialization. If that never happened, the
/// first inference loads them instead.
pub struct CachedWeightsBackend {
    model_type: ModelType,
    cache: Arc<WeightCache>,
    metadata: ModelMetadata,
    engine: Box<dyn Engine>,
    loaded: bool,
}

impl CachedWeightsBackend {
    /// Creates a backend serving `model_type` with the weights described by `metadata`.
    #[must_use]
    pub fn new(
        model_type: ModelType,
        cache: Arc<WeightCache>,
        metadata: ModelMetadata,
        engine: Box<dyn Engine>,
    ) -> Self {
        Self { model_type, cache, metadata, engine, loaded: false }
    }

    async fn ensure_loaded(&mut self, progress: &ProgressSink) -> UnitResult<()> {
        if self.loaded {
            return Ok(());
        }

        let weights = self
            .cache
            .load_model(&self.metadata, |update| {
                progress.report(update.phase.as_str(), update.percentage, Some(update.message));
            })
            .await
            .map_err(|e| UnitError::Weights(e.to_string()))?;

        progress.report(
            LoadPhase::Loading.as_str(),
            100.0,
            Some(format!("Loading {} into the engine", self.metadata.model_id)),
        );
        self.engine.load(weights, &self.metadata).await?;
        self.loaded = true;
        info!(model_type = %self.model_type, model_id = %self.metadata.model_id, "Backend weights loaded");
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for CachedWeightsBackend {
    fn model_type(&self) -> ModelType {
        self.model_type
    }

    async fn initialize(&mut self, progress: &ProgressSink) -> UnitResult<()> {
        self.ensure_loaded(progress).await
    }

    async fn infer(
        &mut self,
        task: &InferenceTask,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> UnitResult<UnitOutput> {
        if task.model_type != self.model_type {
            return Err(UnitError::Unsupported(format!(
                "backend serves {}, task is {}",
                self.model_type, task.model_type
            )));
        }
        self.ensure_loaded(progress).await?;
        self.engine.run(task, progress, cancel).await
    }
}

/// Mock engine that runs a fixed number of timed steps and echoes its input.
///
/// The step count comes from the task's `steps` parameter when present.
/// The cancellation token is checked at every step boundary.
#[derive(Debug, Clone)]
pub struct StepEngine {
    default_steps: u64,
    step_delay: Duration,
    model_version: Option<String>,
    weights_len: usize,
}

impl StepEngine {
    /// Creates an engine running `default_steps` steps of `step_delay` each.
    #[must_use]
    pub fn new(default_steps: u64, step_delay: Duration) -> Self {
        Self { default_steps, step_delay, model_version: None, weights_len: 0 }
    }
}

impl Default for StepEngine {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(10))
    }
}

#[async_trait]
impl Engine for StepEngine {
    async fn load(&mut self, weights: Bytes, metadata: &ModelMetadata) -> UnitResult<()> {
        if weights.is_empty() {
            return Err(UnitError::Weights(format!("{} has no weights", metadata.model_id)));
        }
        self.weights_len = weights.len();
        self.model_version = Some(metadata.version.clone());
        Ok(())
    }

    async fn run(
        &mut self,
        task: &InferenceTask,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> UnitResult<UnitOutput> {
        let steps = task.parameter_u64("steps").unwrap_or(self.default_steps);

        for step in 1..=steps {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(step, steps, "Step engine observed cancellation");
                    return Err(UnitError::Cancelled);
                }
                () = tokio::time::sleep(self.step_delay) => {}
            }
            let percentage = (step as f32 / steps as f32) * 100.0;
            progress.report("inference", percentage, Some(format!("Step {step}/{steps}")));
        }

        let mut metadata = InferenceMetadata {
            model_version: self.model_version.clone(),
            ..InferenceMetadata::default()
        };
        metadata.extra.insert("steps".to_string(), steps.into());
        metadata.extra.insert("weights_bytes".to_string(), self.weights_len.into());

        Ok(UnitOutput { output: task.input.clone(), metadata })
    }
}
