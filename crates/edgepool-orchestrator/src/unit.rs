//! Execution unit runtime.
//!
//! Each unit is a tokio task owning one `InferenceBackend`. The scheduler
//! talks to it only through `UnitRequest`s and hears back through
//! `UnitEvent`s. While a task runs the unit keeps listening: a `cancel` for
//! the running task triggers its token, a `cancel` for a locally held task
//! drops it, and further `inference` requests wait in a local FIFO.

use edgepool_abstraction::{
    CancellationToken, InferenceBackend, InferenceTask, ModelType, ProgressSink, UnitError,
    UnitEvent, UnitRequest,
};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The scheduler's end of a running execution unit.
///
/// Dropping the link aborts the unit.
#[derive(Debug)]
pub struct UnitLink {
    requests: mpsc::UnboundedSender<UnitRequest>,
    join: JoinHandle<()>,
}

impl UnitLink {
    /// Sends a request. Returns `false` if the unit has already exited.
    pub fn send(&self, request: UnitRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    /// Stops the unit, abandoning whatever it is running.
    pub fn shutdown(&self) {
        self.join.abort();
    }

    /// Whether the unit task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for UnitLink {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// Spawns an execution unit around `backend`.
///
/// Returns the link used to drive it and the receiver of its events. The
/// event channel closes when the unit exits, including when it panics.
pub fn spawn_unit(
    backend: Box<dyn InferenceBackend>,
) -> (UnitLink, mpsc::UnboundedReceiver<UnitEvent>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let runtime = UnitRuntime {
        backend,
        requests: request_rx,
        events: event_tx,
        pending: VecDeque::new(),
        initialized: false,
    };
    let join = tokio::spawn(runtime.run());

    (UnitLink { requests: request_tx, join }, event_rx)
}

struct UnitRuntime {
    backend: Box<dyn InferenceBackend>,
    requests: mpsc::UnboundedReceiver<UnitRequest>,
    events: mpsc::UnboundedSender<UnitEvent>,
    pending: VecDeque<(u64, InferenceTask)>,
    initialized: bool,
}

impl UnitRuntime {
    async fn run(mut self) {
        loop {
            let request = match self.pending.pop_front() {
                Some((task_id, task)) => UnitRequest::Inference { task_id, task },
                None => match self.requests.recv().await {
                    Some(request) => request,
                    None => break,
                },
            };

            let keep_running = match request {
                UnitRequest::Initialize { model_type } => self.initialize(model_type).await,
                UnitRequest::Inference { task_id, task } => self.run_task(task_id, task).await,
                UnitRequest::Cancel { task_id } => {
                    debug!(task_id, "Cancel for a task that is not running");
                    true
                }
            };
            if !keep_running {
                break;
            }
        }
        debug!(model_type = %self.backend.model_type(), "Execution unit exiting");
    }

    async fn initialize(&mut self, model_type: ModelType) -> bool {
        let served = self.backend.model_type();
        let event = if served != model_type {
            UnitEvent::Error {
                task_id: None,
                message: format!("unit serves {served}, cannot initialize as {model_type}"),
            }
        } else if self.initialized {
            UnitEvent::Initialized
        } else {
            let sink = ProgressSink::new(self.events.clone());
            match self.backend.initialize(&sink).await {
                Ok(()) => {
                    self.initialized = true;
                    UnitEvent::Initialized
                }
                Err(e) => UnitEvent::Error { task_id: None, message: e.to_string() },
            }
        };
        self.events.send(event).is_ok()
    }

    async fn run_task(&mut self, task_id: u64, task: InferenceTask) -> bool {
        // A child token: a `cancel` request stops this task without touching
        // the caller's token, while the caller's token still reaches the task.
        let token = task
            .cancellation
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let sink = ProgressSink::new(self.events.clone());
        debug!(task_id, "Running task");
        let started = Instant::now();

        let outcome = {
            let infer = self.backend.infer(&task, &sink, &token);
            tokio::pin!(infer);
            loop {
                tokio::select! {
                    outcome = &mut infer => break Some(outcome),
                    request = self.requests.recv() => match request {
                        Some(UnitRequest::Cancel { task_id: target }) if target == task_id => {
                            debug!(task_id, "Cancelling running task");
                            token.cancel();
                        }
                        Some(UnitRequest::Cancel { task_id: target }) => {
                            let before = self.pending.len();
                            self.pending.retain(|(id, _)| *id != target);
                            if self.pending.len() < before
                                && self.events.send(UnitEvent::Cancelled { task_id: target }).is_err()
                            {
                                break None;
                            }
                        }
                        Some(UnitRequest::Inference { task_id: next, task }) => {
                            self.pending.push_back((next, task));
                        }
                        Some(UnitRequest::Initialize { model_type }) => {
                            warn!(%model_type, "Ignoring initialize while a task is running");
                        }
                        None => break None,
                    },
                }
            }
        };

        let Some(outcome) = outcome else {
            return false;
        };
        let event = match outcome {
            Ok(output) => {
                let mut metadata = output.metadata;
                metadata.inference_time_ms = started.elapsed().as_millis() as u64;
                UnitEvent::Result { task_id, output: output.output, metadata }
            }
            Err(UnitError::Cancelled) => UnitEvent::Cancelled { task_id },
            Err(e) => UnitEvent::Error { task_id: Some(task_id), message: e.to_string() },
        };
        self.events.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use edgepool_abstraction::{InferenceMetadata, Payload, UnitOutput, UnitResult};
    use std::time::Duration;

    /// Echoes the input after `delay`, honouring cancellation.
    struct EchoBackend {
        delay: Duration,
        fail_init: bool,
    }

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        fn model_type(&self) -> ModelType {
            ModelType::SpeechAsr
        }

        async fn initialize(&mut self, progress: &ProgressSink) -> UnitResult<()> {
            progress.report("loading", 50.0, None);
            if self.fail_init {
                return Err(UnitError::Weights("no weights".to_string()));
            }
            Ok(())
        }

        async fn infer(
            &mut self,
            task: &InferenceTask,
            _progress: &ProgressSink,
            cancel: &CancellationToken,
        ) -> UnitResult<UnitOutput> {
            tokio::select! {
                () = cancel.cancelled() => Err(UnitError::Cancelled),
                () = tokio::time::sleep(self.delay) => Ok(UnitOutput {
                    output: task.input.clone(),
                    metadata: InferenceMetadata::default(),
                }),
            }
        }
    }

    fn echo(delay_ms: u64) -> Box<dyn InferenceBackend> {
        Box::new(EchoBackend { delay: Duration::from_millis(delay_ms), fail_init: false })
    }

    async fn next_non_progress(events: &mut mpsc::UnboundedReceiver<UnitEvent>) -> UnitEvent {
        loop {
            match events.recv().await.unwrap() {
                UnitEvent::Progress { .. } => {}
                other => return other,
            }
        }
    }

    fn task(text: &str) -> InferenceTask {
        InferenceTask::new(ModelType::SpeechAsr, text)
    }

    #[tokio::test]
    async fn test_handshake_and_inference() {
        let (link, mut events) = spawn_unit(echo(1));
        assert!(link.send(UnitRequest::Initialize { model_type: ModelType::SpeechAsr }));

        assert!(matches!(events.recv().await.unwrap(), UnitEvent::Progress { .. }));
        assert_eq!(events.recv().await.unwrap(), UnitEvent::Initialized);

        link.send(UnitRequest::Inference { task_id: 1, task: task("hello") });
        match next_non_progress(&mut events).await {
            UnitEvent::Result { task_id, output, .. } => {
                assert_eq!(task_id, 1);
                assert_eq!(output, Payload::Text("hello".to_string()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_rejects_other_model_type() {
        let (link, mut events) = spawn_unit(echo(1));
        link.send(UnitRequest::Initialize { model_type: ModelType::Vision });
        assert!(matches!(events.recv().await.unwrap(), UnitEvent::Error { task_id: None, .. }));
    }

    #[tokio::test]
    async fn test_failed_initialize_reports_unit_error() {
        let backend = Box::new(EchoBackend { delay: Duration::ZERO, fail_init: true });
        let (link, mut events) = spawn_unit(backend);
        link.send(UnitRequest::Initialize { model_type: ModelType::SpeechAsr });

        match next_non_progress(&mut events).await {
            UnitEvent::Error { task_id: None, message } => assert!(message.contains("no weights")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_task() {
        let (link, mut events) = spawn_unit(echo(60_000));
        link.send(UnitRequest::Inference { task_id: 7, task: task("slow") });
        tokio::task::yield_now().await;
        link.send(UnitRequest::Cancel { task_id: 7 });

        assert_eq!(next_non_progress(&mut events).await, UnitEvent::Cancelled { task_id: 7 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_token_reaches_running_task() {
        let (link, mut events) = spawn_unit(echo(60_000));
        let caller = CancellationToken::new();
        link.send(UnitRequest::Inference {
            task_id: 3,
            task: task("slow").with_cancellation(caller.clone()),
        });
        tokio::task::yield_now().await;
        caller.cancel();

        assert_eq!(next_non_progress(&mut events).await, UnitEvent::Cancelled { task_id: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_during_task_are_queued_in_order() {
        let (link, mut events) = spawn_unit(echo(100));
        for (id, text) in [(1, "a"), (2, "b"), (3, "c")] {
            link.send(UnitRequest::Inference { task_id: id, task: task(text) });
        }
        // Task 2 is dropped while still held locally.
        tokio::task::yield_now().await;
        link.send(UnitRequest::Cancel { task_id: 2 });

        let mut order = Vec::new();
        while order.len() < 3 {
            match next_non_progress(&mut events).await {
                UnitEvent::Result { task_id, .. } => order.push(format!("result-{task_id}")),
                UnitEvent::Cancelled { task_id } => order.push(format!("cancelled-{task_id}")),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(order, vec!["cancelled-2", "result-1", "result-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_time_excludes_wait_in_local_queue() {
        let (link, mut events) = spawn_unit(echo(100));
        link.send(UnitRequest::Inference { task_id: 1, task: task("first") });
        link.send(UnitRequest::Inference { task_id: 2, task: task("second") });

        for expected in [1, 2] {
            match next_non_progress(&mut events).await {
                UnitEvent::Result { task_id, metadata, .. } => {
                    assert_eq!(task_id, expected);
                    assert_eq!(metadata.inference_time_ms, 100);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_link_stops_unit() {
        let (link, mut events) = spawn_unit(echo(1));
        drop(link);
        assert!(events.recv().await.is_none());
    }
}
