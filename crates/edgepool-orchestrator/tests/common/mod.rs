//! Scripted backends for worker pool tests.

#![allow(dead_code)]

use async_trait::async_trait;
use edgepool_abstraction::{
    BackendFactory, CancellationToken, InferenceBackend, InferenceMetadata, InferenceTask,
    ModelType, ProgressSink, UnitError, UnitOutput, UnitResult,
};
use edgepool_orchestrator::{PoolConfig, WorkerHandle, WorkerPool, WorkerStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// How a scripted backend answers the handshake.
#[derive(Clone)]
pub enum InitMode {
    Succeed,
    Fail(String),
    Hang,
    /// Waits for a permit before acknowledging.
    Gated(Arc<Semaphore>),
}

/// Factory for backends whose behaviour the test controls.
///
/// Inputs drive inference: `"fail"` returns a unit error and `"crash"`
/// panics the unit. Everything else echoes once it gets past the gate (if
/// any) or after `delay`.
#[derive(Clone)]
pub struct ScriptedFactory {
    pub init: InitMode,
    pub gate: Option<Arc<Semaphore>>,
    pub delay: Duration,
    pub cooperative: bool,
    pub started: Arc<Mutex<Vec<String>>>,
    pub created: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            init: InitMode::Succeed,
            gate: None,
            delay: Duration::from_millis(5),
            cooperative: true,
            started: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Inference blocks until the returned semaphore receives a permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn with_init(mut self, init: InitMode) -> Self {
        self.init = init;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Inference ignores its cancellation token.
    pub fn ignoring_cancellation(mut self) -> Self {
        self.cooperative = false;
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, model_type: ModelType) -> UnitResult<Box<dyn InferenceBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBackend { model_type, script: self.clone() }))
    }
}

struct ScriptedBackend {
    model_type: ModelType,
    script: ScriptedFactory,
}

impl ScriptedBackend {
    async fn wait_turn(&self, cancel: &CancellationToken) -> UnitResult<()> {
        let wait = async {
            match &self.script.gate {
                Some(gate) => {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
                None => tokio::time::sleep(self.script.delay).await,
            }
        };

        if self.script.cooperative {
            tokio::select! {
                () = cancel.cancelled() => Err(UnitError::Cancelled),
                () = wait => Ok(()),
            }
        } else {
            wait.await;
            Ok(())
        }
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn model_type(&self) -> ModelType {
        self.model_type
    }

    async fn initialize(&mut self, progress: &ProgressSink) -> UnitResult<()> {
        progress.report("loading", 100.0, Some("scripted".to_string()));
        match &self.script.init {
            InitMode::Succeed => Ok(()),
            InitMode::Fail(message) => Err(UnitError::Weights(message.clone())),
            InitMode::Hang => std::future::pending::<UnitResult<()>>().await,
            InitMode::Gated(gate) => {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                Ok(())
            }
        }
    }

    async fn infer(
        &mut self,
        task: &InferenceTask,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> UnitResult<UnitOutput> {
        let input = task.input.as_text().unwrap_or_default().to_string();
        self.script.started.lock().unwrap().push(input.clone());

        match input.as_str() {
            "fail" => return Err(UnitError::Failed("model exploded".to_string())),
            "crash" => panic!("scripted unit crash"),
            _ => {}
        }

        progress.report("inference", 50.0, None);
        self.wait_turn(cancel).await?;
        progress.report("inference", 100.0, None);

        Ok(UnitOutput {
            output: task.input.clone(),
            metadata: InferenceMetadata {
                model_version: Some("scripted-1".to_string()),
                ..InferenceMetadata::default()
            },
        })
    }
}

pub fn pool_with(factory: &ScriptedFactory) -> WorkerPool {
    WorkerPool::new(PoolConfig::default(), Arc::new(factory.clone())).unwrap()
}

pub fn text_task(model_type: ModelType, text: &str) -> InferenceTask {
    InferenceTask::new(model_type, text)
}

/// Lets spawned tasks run until the worker reaches `status`.
pub async fn wait_for_status(pool: &WorkerPool, handle: &WorkerHandle, status: WorkerStatus) {
    for _ in 0..1_000 {
        if pool.get_worker(&handle.id).await.map(|h| h.status) == Some(status) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("worker {} never reached {status}", handle.id);
}

/// Lets spawned tasks run until `count` tasks are queued on the worker.
pub async fn wait_for_queue(pool: &WorkerPool, handle: &WorkerHandle, count: usize) {
    for _ in 0..1_000 {
        if pool.queued_task_count(handle).await.unwrap() == count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("worker {} never queued {count} tasks", handle.id);
}
