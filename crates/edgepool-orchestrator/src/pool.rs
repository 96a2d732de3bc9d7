//! Worker pool scheduler.
//!
//! The pool owns a bounded set of execution units, at most one per model
//! type. Callers obtain a `WorkerHandle` with `initialize_worker` and submit
//! tasks with `run_inference`. A busy handle queues further tasks in FIFO
//! order; each completion dispatches the next one. Idle units are reclaimed
//! either on demand (when the pool is full) or by the background sweep.
//!
//! Every unit gets an event pump task that applies its events to the pool
//! state. Inference requests carry a pool-assigned task id, and events for a
//! task that is no longer active (cancelled, or its worker terminated) are
//! dropped.
//!
//! The handshake timeout bounds silence, not total initialization time:
//! every progress event the unit sends while initializing (for example per
//! downloaded weight chunk) re-arms it.

use edgepool_abstraction::{
    BackendFactory, CancellationToken, InferenceResult, InferenceTask, ModelType, UnitEvent,
    UnitRequest,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::lifecycle::{WorkerHandle, WorkerStatus};
use crate::progress::{ProgressReporter, ProgressSubscription, ProgressUpdate, SubscriptionId};
use crate::unit::{UnitLink, spawn_unit};

type Reply = oneshot::Sender<PoolResult<InferenceResult>>;
type HandshakeReply = mpsc::UnboundedSender<Handshake>;

/// How many terminated worker ids are remembered for `Terminated` reporting.
const RETIRED_HISTORY: usize = 1024;

/// What an initializing unit has told the pool.
#[derive(Debug)]
enum Handshake {
    Progress,
    Ready,
    Failed(String),
}

/// Snapshot of pool activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    /// Non-terminated workers.
    pub active_workers: usize,
    /// Tasks waiting behind a busy or initializing worker.
    pub queued_tasks: usize,
    /// Tasks that produced a result.
    pub completed: u64,
    /// Tasks the unit reported as failed.
    pub failed: u64,
    /// Tasks settled as cancelled.
    pub cancelled: u64,
    /// Idle workers reclaimed by the sweep or to make room.
    pub reclaimed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    reclaimed: AtomicU64,
}

struct ActiveTask {
    task_id: u64,
    token: CancellationToken,
    reply: Reply,
}

struct QueuedTask {
    task: InferenceTask,
    reply: Reply,
}

struct WorkerRecord {
    handle: WorkerHandle,
    unit: UnitLink,
    active: Option<ActiveTask>,
    queue: VecDeque<QueuedTask>,
    last_used: Instant,
    handshake: Option<HandshakeReply>,
}

impl WorkerRecord {
    fn set_status(&mut self, to: WorkerStatus) {
        let from = self.handle.status;
        if from == to {
            return;
        }
        if from.can_transition_to(to) {
            self.handle.status = to;
        } else {
            warn!(worker_id = %self.handle.id, %from, %to, "Ignoring invalid status transition");
        }
    }

    fn is_idle_since(&self, now: Instant, idle_timeout: std::time::Duration) -> bool {
        self.handle.status == WorkerStatus::Ready
            && self.active.is_none()
            && self.queue.is_empty()
            && now.saturating_duration_since(self.last_used) > idle_timeout
    }
}

#[derive(Default)]
struct PoolState {
    workers: HashMap<String, WorkerRecord>,
    /// Ids of recently terminated workers and the model type they served.
    retired: HashMap<String, ModelType>,
    /// Retirement order, oldest first.
    retired_order: VecDeque<String>,
}

impl PoolState {
    fn remember_retired(&mut self, worker_id: &str, model_type: ModelType) {
        if self.retired.insert(worker_id.to_string(), model_type).is_none() {
            self.retired_order.push_back(worker_id.to_string());
        }
        while self.retired_order.len() > RETIRED_HISTORY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    fn find_by_type(&self, model_type: ModelType) -> Option<&WorkerRecord> {
        self.workers.values().find(|record| record.handle.model_type == model_type)
    }

    /// The ready worker that has been idle longest beyond `idle_timeout`.
    fn idle_candidate(&self, now: Instant, idle_timeout: std::time::Duration) -> Option<String> {
        self.workers
            .values()
            .filter(|record| record.is_idle_since(now, idle_timeout))
            .min_by(|a, b| a.last_used.cmp(&b.last_used).then_with(|| a.handle.id.cmp(&b.handle.id)))
            .map(|record| record.handle.id.clone())
    }

    fn missing(&self, worker_id: &str) -> PoolError {
        if self.retired.contains_key(worker_id) {
            PoolError::Terminated(worker_id.to_string())
        } else {
            PoolError::NotFound(worker_id.to_string())
        }
    }

    fn record_mut(&mut self, worker_id: &str) -> PoolResult<&mut WorkerRecord> {
        if !self.workers.contains_key(worker_id) {
            return Err(self.missing(worker_id));
        }
        self.workers.get_mut(worker_id).ok_or_else(|| PoolError::NotFound(worker_id.to_string()))
    }
}

struct Sweeper {
    token: CancellationToken,
    join: JoinHandle<()>,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn BackendFactory>,
    state: Mutex<PoolState>,
    reporter: ProgressReporter,
    next_task_id: AtomicU64,
    counters: Counters,
    sweeper: StdMutex<Option<Sweeper>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner).take()
        {
            sweeper.token.cancel();
            sweeper.join.abort();
        }
    }
}

/// Why a worker is being retired.
#[derive(Debug, Clone, Copy)]
enum Retirement {
    Terminated,
    Reclaimed,
    Crashed,
    HandshakeFailed,
}

impl PoolInner {
    /// Sends the next live queued task to the unit, or marks the worker ready.
    fn dispatch_next(&self, record: &mut WorkerRecord) {
        while let Some(queued) = record.queue.pop_front() {
            if queued.reply.is_closed() {
                debug!(worker_id = %record.handle.id, "Skipping queued task whose caller went away");
                continue;
            }
            self.start_task(record, queued.task, queued.reply);
            return;
        }
        record.set_status(WorkerStatus::Ready);
    }

    fn start_task(&self, record: &mut WorkerRecord, mut task: InferenceTask, reply: Reply) {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let token = task
            .cancellation
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        task.cancellation = Some(token.clone());

        record.set_status(WorkerStatus::Busy);
        record.last_used = Instant::now();

        if !record.unit.send(UnitRequest::Inference { task_id, task }) {
            warn!(worker_id = %record.handle.id, task_id, "Execution unit is gone, task not dispatched");
            let _ = reply.send(Err(PoolError::Terminated(record.handle.id.clone())));
            return;
        }

        debug!(worker_id = %record.handle.id, task_id, "Dispatched task");
        record.active = Some(ActiveTask { task_id, token, reply });
    }

    /// Removes a worker, failing everything it still owed a result.
    fn retire(&self, state: &mut PoolState, worker_id: &str, reason: Retirement) -> bool {
        let Some(mut record) = state.workers.remove(worker_id) else {
            return false;
        };
        record.set_status(WorkerStatus::Terminated);
        state.remember_retired(worker_id, record.handle.model_type);

        let terminated = || PoolError::Terminated(worker_id.to_string());
        if let Some(active) = record.active.take() {
            active.token.cancel();
            let _ = active.reply.send(Err(terminated()));
        }
        for queued in record.queue.drain(..) {
            let _ = queued.reply.send(Err(terminated()));
        }
        record.handshake.take();
        record.unit.shutdown();

        match reason {
            Retirement::Crashed => {
                error!(worker_id, model_type = %record.handle.model_type, "Execution unit crashed");
            }
            Retirement::HandshakeFailed => {
                error!(worker_id, model_type = %record.handle.model_type, "Worker discarded after failed handshake");
            }
            Retirement::Reclaimed => {
                self.counters.reclaimed.fetch_add(1, Ordering::Relaxed);
                info!(worker_id, model_type = %record.handle.model_type, "Reclaimed idle worker");
            }
            Retirement::Terminated => {
                info!(worker_id, model_type = %record.handle.model_type, "Worker terminated");
            }
        }
        true
    }

    async fn reclaim_idle_worker(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let worker_id = state.idle_candidate(Instant::now(), self.config.idle_timeout())?;
        self.retire(&mut state, &worker_id, Retirement::Reclaimed);
        Some(worker_id)
    }

    async fn handle_event(&self, worker_id: &str, event: UnitEvent) {
        match event {
            UnitEvent::Progress { phase, percentage, message } => {
                debug!(worker_id, %phase, percentage, "Unit progress");
                if let Some(handshake) =
                    self.state.lock().await.workers.get(worker_id).and_then(|r| r.handshake.as_ref())
                {
                    let _ = handshake.send(Handshake::Progress);
                }
                self.reporter.emit(&ProgressUpdate {
                    worker_id: worker_id.to_string(),
                    phase,
                    percentage,
                    message,
                });
            }
            UnitEvent::Initialized => {
                let mut state = self.state.lock().await;
                match state.workers.get_mut(worker_id).and_then(|r| r.handshake.take()) {
                    Some(reply) => {
                        let _ = reply.send(Handshake::Ready);
                    }
                    None => warn!(worker_id, "Unexpected initialized event"),
                }
            }
            UnitEvent::Error { task_id: None, message } => {
                let mut state = self.state.lock().await;
                let Some(record) = state.workers.get_mut(worker_id) else {
                    return;
                };
                if let Some(reply) = record.handshake.take() {
                    let _ = reply.send(Handshake::Failed(message));
                } else {
                    warn!(worker_id, %message, "Unit reported an unsolicited error");
                    self.retire(&mut state, worker_id, Retirement::Crashed);
                }
            }
            UnitEvent::Result { task_id, output, metadata } => {
                self.settle(worker_id, task_id, |model_type| {
                    Outcome::Completed(InferenceResult { model_type, output, metadata })
                })
                .await;
            }
            UnitEvent::Error { task_id: Some(task_id), message } => {
                self.settle(worker_id, task_id, |_| Outcome::Failed(message)).await;
            }
            UnitEvent::Cancelled { task_id } => {
                self.settle(worker_id, task_id, |_| Outcome::Cancelled).await;
            }
        }
    }

    /// Resolves the active task if `task_id` still names it, then moves on
    /// to the next queued task.
    async fn settle<F>(&self, worker_id: &str, task_id: u64, outcome: F)
    where
        F: FnOnce(ModelType) -> Outcome,
    {
        let mut state = self.state.lock().await;
        let Some(record) = state.workers.get_mut(worker_id) else {
            debug!(worker_id, task_id, "Dropping event for a retired worker");
            return;
        };
        let is_current = record.active.as_ref().is_some_and(|active| active.task_id == task_id);
        if !is_current {
            warn!(worker_id, task_id, "Dropping stale event for a settled task");
            return;
        }
        let Some(active) = record.active.take() else {
            return;
        };

        let result = match outcome(record.handle.model_type) {
            Outcome::Completed(result) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, task_id, inference_time_ms = result.metadata.inference_time_ms, "Task completed");
                Ok(result)
            }
            Outcome::Failed(message) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, task_id, %message, "Task failed");
                Err(PoolError::Inference(message))
            }
            Outcome::Cancelled => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, task_id, "Task cancelled by the unit");
                Err(PoolError::Cancelled(worker_id.to_string()))
            }
        };
        let _ = active.reply.send(result);

        record.last_used = Instant::now();
        self.dispatch_next(record);
    }

    async fn handle_unit_exit(&self, worker_id: &str) {
        let mut state = self.state.lock().await;
        if state.workers.contains_key(worker_id) {
            self.retire(&mut state, worker_id, Retirement::Crashed);
        }
    }
}

enum Outcome {
    Completed(InferenceResult),
    Failed(String),
    Cancelled,
}

async fn pump_events(
    inner: Weak<PoolInner>,
    worker_id: String,
    mut events: mpsc::UnboundedReceiver<UnitEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_event(&worker_id, event).await;
    }
    if let Some(inner) = inner.upgrade() {
        inner.handle_unit_exit(&worker_id).await;
    }
}

async fn sweep_loop(inner: Weak<PoolInner>, token: CancellationToken, period: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if let Some(worker_id) = inner.reclaim_idle_worker().await {
                    debug!(%worker_id, "Idle sweep reclaimed a worker");
                }
            }
        }
    }
    debug!("Idle sweep stopped");
}

/// Bounded pool of execution units.
///
/// Cloning a pool yields another handle to the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("reporter", &self.inner.reporter)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates an empty pool. The idle sweep is not running until
    /// `start_idle_sweep` is called.
    ///
    /// # Errors
    /// Returns `PoolError::Config` if the configuration is invalid.
    pub fn new(config: PoolConfig, factory: Arc<dyn BackendFactory>) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState::default()),
                reporter: ProgressReporter::new(),
                next_task_id: AtomicU64::new(1),
                counters: Counters::default(),
                sweeper: StdMutex::new(None),
            }),
        })
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns a handle to a worker for `model_type`.
    ///
    /// An existing non-terminated worker of that type is returned as is.
    /// Otherwise a new unit is spawned, reclaiming one idle worker first if
    /// the pool is full, and the call waits for its handshake. A unit that
    /// keeps reporting progress while it initializes (weight downloads do)
    /// is given as long as it needs.
    ///
    /// # Errors
    /// * `PoolError::PoolExhausted` - the pool is full and nothing is idle long enough
    /// * `PoolError::InitializationTimeout` - the unit went silent for longer than the handshake timeout
    /// * `PoolError::InitializationFailed` - the backend or the unit reported an error
    pub async fn initialize_worker(&self, model_type: ModelType) -> PoolResult<WorkerHandle> {
        let inner = &self.inner;
        let (worker_id, mut handshake) = {
            let mut state = inner.state.lock().await;
            if let Some(record) = state.find_by_type(model_type) {
                debug!(worker_id = %record.handle.id, %model_type, "Reusing worker");
                return Ok(record.handle.clone());
            }

            if state.workers.len() >= inner.config.max_workers {
                let Some(idle) = state.idle_candidate(Instant::now(), inner.config.idle_timeout())
                else {
                    warn!(%model_type, max_workers = inner.config.max_workers, "Worker pool exhausted");
                    return Err(PoolError::PoolExhausted { max_workers: inner.config.max_workers });
                };
                inner.retire(&mut state, &idle, Retirement::Reclaimed);
            }

            let backend = inner.factory.create(model_type).map_err(|e| {
                PoolError::InitializationFailed { model_type, message: e.to_string() }
            })?;
            let (unit, events) = spawn_unit(backend);
            let worker_id = format!("worker-{}", Uuid::new_v4());
            let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
            unit.send(UnitRequest::Initialize { model_type });

            state.workers.insert(
                worker_id.clone(),
                WorkerRecord {
                    handle: WorkerHandle::new(worker_id.clone(), model_type),
                    unit,
                    active: None,
                    queue: VecDeque::new(),
                    last_used: Instant::now(),
                    handshake: Some(handshake_tx),
                },
            );
            tokio::spawn(pump_events(Arc::downgrade(inner), worker_id.clone(), events));
            info!(%worker_id, %model_type, "Worker spawned");
            (worker_id, handshake_rx)
        };

        // Each unit progress event re-arms the timeout.
        let timeout = inner.config.handshake_timeout();
        let failure = loop {
            match tokio::time::timeout(timeout, handshake.recv()).await {
                Ok(Some(Handshake::Progress)) => {}
                Ok(Some(Handshake::Ready)) => {
                    let mut state = inner.state.lock().await;
                    let record = state.record_mut(&worker_id)?;
                    record.set_status(WorkerStatus::Ready);
                    record.last_used = Instant::now();
                    let handle = record.handle.clone();
                    inner.dispatch_next(record);
                    info!(%worker_id, %model_type, "Worker ready");
                    return Ok(handle);
                }
                Ok(Some(Handshake::Failed(message))) => {
                    break PoolError::InitializationFailed { model_type, message };
                }
                Ok(None) => {
                    break PoolError::InitializationFailed {
                        model_type,
                        message: "execution unit exited during initialization".to_string(),
                    };
                }
                Err(_) => break PoolError::InitializationTimeout { model_type, timeout },
            }
        };

        let mut state = inner.state.lock().await;
        inner.retire(&mut state, &worker_id, Retirement::HandshakeFailed);
        error!(%worker_id, %model_type, error = %failure, "Worker initialization failed");
        Err(failure)
    }

    /// Runs a task on the worker behind `handle`.
    ///
    /// A ready worker starts the task at once; a busy or initializing worker
    /// queues it behind earlier tasks. The result settles when the unit
    /// answers, when the task is cancelled, or when the worker is terminated.
    ///
    /// # Errors
    /// * `PoolError::NotFound` / `PoolError::Terminated` - no live worker behind the handle
    /// * `PoolError::InvalidState` - the task's model type differs from the worker's
    /// * `PoolError::Inference` - the unit reported a failure (message verbatim)
    /// * `PoolError::Cancelled` - the task was cancelled
    pub async fn run_inference(
        &self,
        handle: &WorkerHandle,
        task: InferenceTask,
    ) -> PoolResult<InferenceResult> {
        let receiver = {
            let mut state = self.inner.state.lock().await;
            let record = state.record_mut(&handle.id)?;
            if task.model_type != record.handle.model_type {
                return Err(PoolError::InvalidState(format!(
                    "task for {} submitted to {} worker {}",
                    task.model_type, record.handle.model_type, handle.id
                )));
            }

            let (reply, receiver) = oneshot::channel();
            match record.handle.status {
                WorkerStatus::Ready => self.inner.start_task(record, task, reply),
                WorkerStatus::Busy | WorkerStatus::Initializing => {
                    record.queue.push_back(QueuedTask { task, reply });
                    debug!(
                        worker_id = %handle.id,
                        status = %record.handle.status,
                        depth = record.queue.len(),
                        "Queued task"
                    );
                }
                WorkerStatus::Terminated => return Err(PoolError::Terminated(handle.id.clone())),
            }
            receiver
        };

        receiver.await.unwrap_or_else(|_| Err(PoolError::Terminated(handle.id.clone())))
    }

    /// Cancels the task currently running on the worker.
    ///
    /// The token is triggered and the unit is asked to stop, but the pending
    /// result settles with `PoolError::Cancelled` right away and the worker
    /// moves on to its next queued task (or becomes ready). The unit stops
    /// only if its computation observes the token; a result it still
    /// produces is discarded. Until then the next task waits inside the unit,
    /// and its `inference_time_ms` counts from when the unit actually starts
    /// it. Returns whether a task was running.
    ///
    /// # Errors
    /// Returns `PoolError::NotFound` / `PoolError::Terminated` for a dead handle.
    pub async fn cancel_inference(&self, handle: &WorkerHandle) -> PoolResult<bool> {
        let mut state = self.inner.state.lock().await;
        let record = state.record_mut(&handle.id)?;
        let Some(active) = record.active.take() else {
            return Ok(false);
        };

        active.token.cancel();
        record.unit.send(UnitRequest::Cancel { task_id: active.task_id });
        let _ = active.reply.send(Err(PoolError::Cancelled(handle.id.clone())));
        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        info!(worker_id = %handle.id, task_id = active.task_id, "Cancelled inference");

        record.last_used = Instant::now();
        self.inner.dispatch_next(record);
        Ok(true)
    }

    /// Terminates the worker, failing its running and queued tasks with
    /// `PoolError::Terminated`. Terminating a terminated worker is a no-op.
    ///
    /// # Errors
    /// Returns `PoolError::NotFound` if the pool never created this worker.
    pub async fn terminate_worker(&self, handle: &WorkerHandle) -> PoolResult<()> {
        let mut state = self.inner.state.lock().await;
        if self.inner.retire(&mut state, &handle.id, Retirement::Terminated)
            || state.retired.contains_key(&handle.id)
        {
            Ok(())
        } else {
            Err(PoolError::NotFound(handle.id.clone()))
        }
    }

    /// Terminates the worker that has been idle longest, if any has been
    /// idle beyond the idle timeout. Busy, queued and initializing workers
    /// are never reclaimed.
    pub async fn reclaim_idle_worker(&self) -> Option<String> {
        self.inner.reclaim_idle_worker().await
    }

    /// Starts the background sweep reclaiming at most one idle worker per
    /// tick. Has no effect if it is already running.
    pub fn start_idle_sweep(&self) {
        let mut sweeper = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|s| !s.join.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let period = self.inner.config.sweep_interval();
        let join = tokio::spawn(sweep_loop(Arc::downgrade(&self.inner), token.clone(), period));
        info!(interval_secs = period.as_secs(), "Idle sweep started");
        *sweeper = Some(Sweeper { token, join });
    }

    /// Stops the background sweep.
    pub fn stop_idle_sweep(&self) {
        let stopped = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sweeper) = stopped {
            sweeper.token.cancel();
            debug!("Idle sweep stop requested");
        }
    }

    /// Whether the background sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.join.is_finished())
    }

    /// Terminates every worker, stops the sweep and removes all progress
    /// subscribers. Afterwards the pool no longer remembers any worker id.
    pub async fn cleanup(&self) {
        self.stop_idle_sweep();
        let mut state = self.inner.state.lock().await;
        let ids: Vec<String> = state.workers.keys().cloned().collect();
        for worker_id in &ids {
            self.inner.retire(&mut state, worker_id, Retirement::Terminated);
        }
        state.retired.clear();
        state.retired_order.clear();
        drop(state);
        self.inner.reporter.clear();
        info!(terminated = ids.len(), "Worker pool cleaned up");
    }

    /// Number of non-terminated workers.
    pub async fn get_active_worker_count(&self) -> usize {
        self.inner.state.lock().await.workers.len()
    }

    /// Current snapshot of a worker's handle. The most recently terminated
    /// workers are reported with status `Terminated`.
    pub async fn get_worker(&self, worker_id: &str) -> Option<WorkerHandle> {
        let state = self.inner.state.lock().await;
        if let Some(record) = state.workers.get(worker_id) {
            return Some(record.handle.clone());
        }
        state.retired.get(worker_id).map(|model_type| WorkerHandle {
            id: worker_id.to_string(),
            model_type: *model_type,
            status: WorkerStatus::Terminated,
        })
    }

    /// Snapshots of all non-terminated workers, ordered by id.
    pub async fn list_workers(&self) -> Vec<WorkerHandle> {
        let state = self.inner.state.lock().await;
        let mut handles: Vec<_> = state.workers.values().map(|r| r.handle.clone()).collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    /// Number of tasks waiting behind the worker's current task.
    ///
    /// # Errors
    /// Returns `PoolError::NotFound` / `PoolError::Terminated` for a dead handle.
    pub async fn queued_task_count(&self, handle: &WorkerHandle) -> PoolResult<usize> {
        let mut state = self.inner.state.lock().await;
        Ok(state.record_mut(&handle.id)?.queue.len())
    }

    /// Snapshot of pool counters.
    pub async fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock().await;
        let counters = &self.inner.counters;
        PoolMetrics {
            active_workers: state.workers.len(),
            queued_tasks: state.workers.values().map(|r| r.queue.len()).sum(),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            reclaimed: counters.reclaimed.load(Ordering::Relaxed),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.inner.reporter.on_progress(callback)
    }

    /// Registers a channel progress subscriber.
    pub fn subscribe(&self) -> ProgressSubscription {
        self.inner.reporter.subscribe()
    }

    /// Removes a progress subscriber. Returns whether it was registered.
    pub fn off_progress(&self, id: SubscriptionId) -> bool {
        self.inner.reporter.off_progress(id)
    }
}
