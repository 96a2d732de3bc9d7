//! Progress fan-out for worker pool subscribers.
//!
//! Units report progress for initialization (weight download and loading)
//! and for running tasks. Each report is tagged with the worker id and
//! delivered to every registered subscriber, either a callback or a channel.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// A progress report from one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// The reporting worker.
    pub worker_id: String,
    /// Phase name (e.g. `downloading`, `inference`).
    pub phase: String,
    /// Completion percentage in `0..=100`.
    pub percentage: f32,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

/// Identifies a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Callback invoked for every progress update.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Callback(ProgressCallback),
    Channel(mpsc::UnboundedSender<ProgressUpdate>),
}

/// Channel-backed progress subscription.
#[derive(Debug)]
pub struct ProgressSubscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ProgressUpdate>,
}

impl ProgressSubscription {
    /// The id to pass to `off_progress`.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next update. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<ProgressUpdate> {
        self.receiver.recv().await
    }

    /// Returns the next buffered update without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressUpdate> {
        self.receiver.try_recv().ok()
    }
}

/// Registry of progress subscribers.
#[derive(Default)]
pub struct ProgressReporter {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriptionId, Subscriber>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).insert(id, subscriber);
        id
    }

    /// Registers a callback.
    pub fn on_progress<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.register(Subscriber::Callback(Arc::new(callback)))
    }

    /// Registers a channel subscriber.
    pub fn subscribe(&self) -> ProgressSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.register(Subscriber::Channel(sender));
        ProgressSubscription { id, receiver }
    }

    /// Removes a subscriber. Returns whether it was registered.
    pub fn off_progress(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).remove(&id).is_some()
    }

    /// Removes every subscriber.
    pub fn clear(&self) {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delivers an update to every subscriber in registration order.
    ///
    /// Callbacks run outside the registry lock, so they may register or
    /// remove subscribers themselves.
    pub fn emit(&self, update: &ProgressUpdate) {
        let snapshot: Vec<(SubscriptionId, Subscriber)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, subscriber) in snapshot {
            match subscriber {
                Subscriber::Callback(callback) => callback(update),
                Subscriber::Channel(sender) => {
                    if sender.send(update.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            for id in closed {
                subscribers.remove(&id);
                debug!(?id, "Dropped closed progress subscription");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn update(worker_id: &str, percentage: f32) -> ProgressUpdate {
        ProgressUpdate {
            worker_id: worker_id.to_string(),
            phase: "inference".to_string(),
            percentage,
            message: None,
        }
    }

    #[test]
    fn test_callback_receives_updates() {
        let reporter = ProgressReporter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        reporter.on_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reporter.emit(&update("worker-1", 10.0));
        reporter.emit(&update("worker-1", 20.0));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_preserves_order() {
        let reporter = ProgressReporter::new();
        let mut subscription = reporter.subscribe();

        for pct in [10.0, 50.0, 100.0] {
            reporter.emit(&update("worker-1", pct));
        }

        let received: Vec<f32> =
            std::iter::from_fn(|| subscription.try_recv()).map(|u| u.percentage).collect();
        assert_eq!(received, vec![10.0, 50.0, 100.0]);
    }

    #[test]
    fn test_off_progress_stops_delivery() {
        let reporter = ProgressReporter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = reporter.on_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reporter.emit(&update("worker-1", 10.0));
        assert!(reporter.off_progress(id));
        assert!(!reporter.off_progress(id));
        reporter.emit(&update("worker-1", 20.0));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let reporter = ProgressReporter::new();
        let subscription = reporter.subscribe();
        assert_eq!(reporter.subscriber_count(), 1);

        drop(subscription);
        reporter.emit(&update("worker-1", 10.0));
        assert_eq!(reporter.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let reporter = Arc::new(ProgressReporter::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let inner_reporter = Arc::clone(&reporter);
        let inner_slot = Arc::clone(&slot);
        let id = reporter.on_progress(move |_| {
            if let Some(id) = inner_slot.lock().unwrap().take() {
                inner_reporter.off_progress(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        reporter.emit(&update("worker-1", 10.0));
        assert_eq!(reporter.subscriber_count(), 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let reporter = ProgressReporter::new();
        reporter.on_progress(|_| {});
        let _subscription = reporter.subscribe();
        reporter.clear();
        assert_eq!(reporter.subscriber_count(), 0);
    }
}
