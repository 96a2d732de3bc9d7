//! Message contract between the worker pool and an execution unit.
//!
//! Requests flow from the scheduler into a unit; events flow back. Inference
//! requests and their outcome events carry a `task_id` so the scheduler can
//! tell a late event from a task it already settled apart from the current one.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{InferenceMetadata, InferenceTask, ModelType, Payload};

/// A message sent from the scheduler to an execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UnitRequest {
    /// Handshake: bind the unit to its model type and prepare it.
    Initialize {
        /// The model type the unit must serve.
        model_type: ModelType,
    },
    /// Run a task.
    Inference {
        /// Scheduler-assigned task identifier.
        task_id: u64,
        /// The task to run.
        task: InferenceTask,
    },
    /// Ask the unit to stop a task at its next checkpoint.
    Cancel {
        /// The task to cancel.
        task_id: u64,
    },
}

/// A message sent from an execution unit to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UnitEvent {
    /// Handshake acknowledgment.
    Initialized,
    /// Progress of initialization or of the current task.
    Progress {
        /// Phase name (e.g. `downloading`, `inference`).
        phase: String,
        /// Completion percentage in `0..=100`.
        percentage: f32,
        /// Optional human-readable detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A task completed.
    Result {
        /// The completed task.
        task_id: u64,
        /// The produced output.
        output: Payload,
        /// Backend-reported metadata.
        metadata: InferenceMetadata,
    },
    /// A failure. Without a `task_id` this is a unit-level error: a failed
    /// handshake, or a crash when it arrives after initialization.
    Error {
        /// The failed task, if the error belongs to one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<u64>,
        /// The unit-reported message.
        message: String,
    },
    /// A task observed its cancellation token and stopped.
    Cancelled {
        /// The cancelled task.
        task_id: u64,
    },
}

/// Handle a backend uses to report progress back to the scheduler.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    events: mpsc::UnboundedSender<UnitEvent>,
}

impl ProgressSink {
    /// Creates a sink that forwards progress onto an event channel.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<UnitEvent>) -> Self {
        Self { events }
    }

    /// Creates a sink whose reports go nowhere.
    #[must_use]
    pub fn disconnected() -> Self {
        let (events, _) = mpsc::unbounded_channel();
        Self { events }
    }

    /// Reports progress. The percentage is clamped to `0..=100`.
    ///
    /// Reporting never fails; progress sent after the scheduler stopped
    /// listening is dropped.
    pub fn report(&self, phase: impl Into<String>, percentage: f32, message: Option<String>) {
        let _ = self.events.send(UnitEvent::Progress {
            phase: phase.into(),
            percentage: percentage.clamp(0.0, 100.0),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags() {
        let json = serde_json::to_value(UnitEvent::Initialized).unwrap();
        assert_eq!(json, serde_json::json!({"type": "initialized"}));

        let json = serde_json::to_value(UnitEvent::Error {
            task_id: None,
            message: "device lost".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "message": "device lost"}));

        let json = serde_json::to_value(UnitEvent::Cancelled { task_id: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "cancelled", "task_id": 3}));
    }

    #[test]
    fn test_request_tags() {
        let json =
            serde_json::to_value(UnitRequest::Initialize { model_type: ModelType::SpeechTts })
                .unwrap();
        assert_eq!(json, serde_json::json!({"type": "initialize", "model_type": "speech-tts"}));

        let json = serde_json::to_value(UnitRequest::Cancel { task_id: 9 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "cancel", "task_id": 9}));
    }

    #[test]
    fn test_progress_event_round_trip() {
        let event = UnitEvent::Progress {
            phase: "downloading".to_string(),
            percentage: 45.0,
            message: Some("1 MB of 2 MB".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: UnitEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[tokio::test]
    async fn test_progress_sink_clamps_percentage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ProgressSink::new(tx);

        sink.report("inference", 150.0, None);
        sink.report("inference", -3.0, Some("warming up".to_string()));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, UnitEvent::Progress { percentage, .. } if percentage == 100.0));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, UnitEvent::Progress { percentage, .. } if percentage == 0.0));
    }

    #[test]
    fn test_disconnected_sink_does_not_panic() {
        let sink = ProgressSink::disconnected();
        sink.report("loading", 50.0, None);
    }
}
