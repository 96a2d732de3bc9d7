//! Worker handle lifecycle.
//!
//! This module defines the caller-visible identity of an execution unit and
//! the status transitions it may go through.

use edgepool_abstraction::ModelType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// The handshake is in flight.
    Initializing,
    /// Idle and accepting tasks.
    Ready,
    /// Running a task.
    Busy,
    /// Released. Terminal.
    Terminated,
}

impl WorkerStatus {
    /// Checks if the worker can transition to the given status.
    ///
    /// # Arguments
    /// * `to` - The target status
    ///
    /// # Returns
    /// Returns `true` if the transition is valid, `false` otherwise.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // Nothing leaves Terminated
            (Self::Terminated, _) => false,
            // Anything else may be terminated
            (_, Self::Terminated) => true,
            (Self::Initializing, Self::Ready) => true,
            (Self::Ready, Self::Busy) => true,
            (Self::Busy, Self::Ready) => true,
            _ => false,
        }
    }

    /// Whether the status is `Terminated`.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Caller-visible identity and status of an execution unit.
///
/// A handle is a snapshot: the pool owns the live status, and
/// `WorkerPool::get_worker` returns a fresh copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    /// Unique worker id.
    pub id: String,
    /// The model type the worker is bound to.
    pub model_type: ModelType,
    /// Status at the time the snapshot was taken.
    pub status: WorkerStatus,
}

impl WorkerHandle {
    pub(crate) fn new(id: String, model_type: ModelType) -> Self {
        Self { id, model_type, status: WorkerStatus::Initializing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(WorkerStatus::Initializing.can_transition_to(WorkerStatus::Ready));
        assert!(WorkerStatus::Ready.can_transition_to(WorkerStatus::Busy));
        assert!(WorkerStatus::Busy.can_transition_to(WorkerStatus::Ready));
        for status in [WorkerStatus::Initializing, WorkerStatus::Ready, WorkerStatus::Busy] {
            assert!(status.can_transition_to(WorkerStatus::Terminated));
        }
    }

    #[test]
    fn test_forbidden_transitions() {
        assert!(!WorkerStatus::Initializing.can_transition_to(WorkerStatus::Busy));
        assert!(!WorkerStatus::Ready.can_transition_to(WorkerStatus::Initializing));
        assert!(!WorkerStatus::Busy.can_transition_to(WorkerStatus::Initializing));
        assert!(!WorkerStatus::Ready.can_transition_to(WorkerStatus::Ready));
    }

    #[test]
    fn test_terminated_is_terminal() {
        for status in [
            WorkerStatus::Initializing,
            WorkerStatus::Ready,
            WorkerStatus::Busy,
            WorkerStatus::Terminated,
        ] {
            assert!(!WorkerStatus::Terminated.can_transition_to(status));
        }
        assert!(WorkerStatus::Terminated.is_terminated());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&WorkerStatus::Busy).unwrap(), "\"busy\"");
        assert_eq!(WorkerStatus::Initializing.to_string(), "initializing");
    }

    #[test]
    fn test_new_handle_is_initializing() {
        let handle = WorkerHandle::new("worker-1".to_string(), ModelType::Vision);
        assert_eq!(handle.status, WorkerStatus::Initializing);
    }
}
