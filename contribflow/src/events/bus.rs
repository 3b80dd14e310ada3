//! Per-subscriber event dispatch.

use super::{EventSubscriber, SchedulerEvent};
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delivery counters for an [`EventBus`].
#[derive(Debug, Default)]
pub struct BusMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl BusMetrics {
    /// Events published.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Successful subscriber deliveries.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Deliveries where the subscriber returned an error or panicked.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

struct Subscription {
    name: String,
    sender: mpsc::UnboundedSender<Arc<SchedulerEvent>>,
    task: JoinHandle<()>,
}

/// Fans events out to subscribers, each on its own queue and task.
///
/// Publishing never blocks and never fails. Within one subscriber, events
/// arrive in publish order.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    metrics: Arc<BusMetrics>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and spawns its dispatch task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Arc<SchedulerEvent>>();
        let name = subscriber.name().to_string();
        let metrics = self.metrics.clone();
        let task_name = name.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let outcome = AssertUnwindSafe(subscriber.handle(&event))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {
                        metrics.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(subscriber = %task_name, event_type = %event.kind, error = %e, "Subscriber failed");
                    }
                    Err(panic) => {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscriber = %task_name,
                            event_type = %event.kind,
                            panic = %panic_message(panic.as_ref()),
                            "Subscriber panicked"
                        );
                    }
                }
            }
            debug!(subscriber = %task_name, "Subscriber queue closed");
        });

        self.subscriptions.write().push(Subscription { name, sender, task });
    }

    /// Queues `event` for every subscriber, in registration order.
    pub fn publish(&self, event: SchedulerEvent) {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(event);
        for subscription in self.subscriptions.read().iter() {
            if subscription.sender.send(event.clone()).is_err() {
                warn!(subscriber = %subscription.name, "Subscriber task is gone, event dropped");
            }
        }
    }

    /// Number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Delivery counters.
    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Closes every queue and waits for subscribers to drain what was already published.
    pub async fn shutdown(&self) {
        let subscriptions: Vec<Subscription> = self.subscriptions.write().drain(..).collect();
        for Subscription { name, sender, task } in subscriptions {
            drop(sender);
            if let Err(e) = task.await {
                warn!(subscriber = %name, error = %e, "Subscriber task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("metrics", &self.metrics)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
