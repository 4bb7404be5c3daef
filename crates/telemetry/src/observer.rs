//! Observer hub: asynchronous, best-effort delivery of orchestration events
//! to registered observers.
//!
//! The engine only ever calls [`ObserverHub::publish`], which pushes the event
//! onto a bounded queue and returns. A dispatcher task drains the queue and
//! hands each event to every interested observer on its own task. Observer
//! errors are logged and never retried.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;
use stratus_core::PlanExecutionId;
use tokio::sync::mpsc;

use crate::event::{EventBus, EventSubscriber, OrchestrationEvent, OrchestrationEventType};

/// Error returned by an observer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The observer could not handle the event.
    #[error("observer {observer} failed: {message}")]
    Failed {
        /// Observer name.
        observer: String,
        /// What went wrong.
        message: String,
    },
}

impl ObserverError {
    /// Convenience constructor for [`ObserverError::Failed`].
    pub fn failed(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

/// A listener for orchestration events.
#[async_trait]
pub trait OrchestrationObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Filter; observers receive every event type by default.
    fn interested_in(&self, _event_type: OrchestrationEventType) -> bool {
        true
    }

    /// Handles one event.
    async fn on_event(&self, event: &OrchestrationEvent) -> Result<(), ObserverError>;
}

/// Fan-out point for orchestration events.
///
/// Every published event also goes to the broadcast [`EventBus`], so
/// in-process subscribers see the same stream.
pub struct ObserverHub {
    sender: mpsc::Sender<OrchestrationEvent>,
    bus: Arc<EventBus>,
    published_once: DashSet<(PlanExecutionId, OrchestrationEventType)>,
    dropped: AtomicU64,
}

impl ObserverHub {
    /// Starts the dispatcher task. Must be called inside a Tokio runtime.
    ///
    /// `queue_capacity` bounds the number of events waiting for dispatch;
    /// events published while the queue is full are dropped.
    #[must_use]
    pub fn start(
        observers: Vec<Arc<dyn OrchestrationObserver>>,
        queue_capacity: usize,
        event_bus_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(dispatch(receiver, Arc::from(observers)));
        Self {
            sender,
            bus: Arc::new(EventBus::new(event_bus_capacity)),
            published_once: DashSet::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publishes an event without waiting for delivery.
    pub fn publish(&self, event: OrchestrationEvent) {
        self.bus.emit(event.clone());
        if let Err(e) = self.sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "observer queue rejected event");
        }
    }

    /// Publishes `event` unless an event of the same type was already
    /// published for its plan execution. Returns `true` if it was published.
    pub fn publish_once(&self, event: OrchestrationEvent) -> bool {
        let key = (event.plan_execution_id(), event.event_type);
        if !self.published_once.insert(key) {
            tracing::debug!(
                plan_execution_id = %key.0,
                event_type = %key.1,
                "event already published for this plan execution"
            );
            return false;
        }
        self.publish(event);
        true
    }

    /// Forgets which once-per-plan events were published for a plan execution.
    pub fn forget_plan(&self, plan_execution_id: PlanExecutionId) {
        self.published_once.retain(|(id, _)| *id != plan_execution_id);
    }

    /// Subscribes to the broadcast stream of published events.
    pub fn subscribe(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    /// The underlying broadcast bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Events dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHub")
            .field("bus", &self.bus)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<OrchestrationEvent>,
    observers: Arc<[Arc<dyn OrchestrationObserver>]>,
) {
    while let Some(event) = receiver.recv().await {
        let event = Arc::new(event);
        for observer in observers.iter() {
            if !observer.interested_in(event.event_type) {
                continue;
            }
            let observer = Arc::clone(observer);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                if let Err(e) = observer.on_event(&event).await {
                    tracing::warn!(
                        observer = observer.name(),
                        event_type = %event.event_type,
                        plan_execution_id = %event.plan_execution_id(),
                        error = %e,
                        "observer failed to handle event"
                    );
                }
            });
        }
    }
    tracing::debug!("observer queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stratus_core::{Ambiance, PlanId};

    struct Recording {
        tx: mpsc::UnboundedSender<OrchestrationEventType>,
        only: Option<OrchestrationEventType>,
    }

    #[async_trait]
    impl OrchestrationObserver for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn interested_in(&self, event_type: OrchestrationEventType) -> bool {
            self.only.is_none_or(|only| only == event_type)
        }

        async fn on_event(&self, event: &OrchestrationEvent) -> Result<(), ObserverError> {
            let _ = self.tx.send(event.event_type);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl OrchestrationObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_event(&self, _event: &OrchestrationEvent) -> Result<(), ObserverError> {
            Err(ObserverError::failed("failing", "boom"))
        }
    }

    fn event(pe: PlanExecutionId, event_type: OrchestrationEventType) -> OrchestrationEvent {
        OrchestrationEvent::new(event_type, Ambiance::new(pe, PlanId::new()))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<OrchestrationEventType>) -> Option<OrchestrationEventType> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn observers_receive_published_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = ObserverHub::start(vec![Arc::new(Recording { tx, only: None })], 16, 16);

        hub.publish(event(PlanExecutionId::new(), OrchestrationEventType::NodeExecutionStart));
        assert_eq!(next(&mut rx).await, Some(OrchestrationEventType::NodeExecutionStart));
    }

    #[tokio::test]
    async fn publish_once_suppresses_repeats_per_plan() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = ObserverHub::start(vec![Arc::new(Recording { tx, only: None })], 16, 16);
        let pe = PlanExecutionId::new();

        assert!(hub.publish_once(event(pe, OrchestrationEventType::OrchestrationEnd)));
        assert!(!hub.publish_once(event(pe, OrchestrationEventType::OrchestrationEnd)));
        assert!(hub.publish_once(event(PlanExecutionId::new(), OrchestrationEventType::OrchestrationEnd)));

        assert!(next(&mut rx).await.is_some());
        assert!(next(&mut rx).await.is_some());
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn forgotten_plan_may_publish_again() {
        let hub = ObserverHub::start(Vec::new(), 16, 16);
        let pe = PlanExecutionId::new();
        let other = PlanExecutionId::new();
        assert!(hub.publish_once(event(pe, OrchestrationEventType::OrchestrationEnd)));
        assert!(hub.publish_once(event(other, OrchestrationEventType::OrchestrationEnd)));

        hub.forget_plan(pe);
        assert!(hub.publish_once(event(pe, OrchestrationEventType::OrchestrationEnd)));
        assert!(!hub.publish_once(event(other, OrchestrationEventType::OrchestrationEnd)));
    }

    #[tokio::test]
    async fn failing_observer_does_not_block_others() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = ObserverHub::start(
            vec![Arc::new(Failing), Arc::new(Recording { tx, only: None })],
            16,
            16,
        );

        hub.publish(event(PlanExecutionId::new(), OrchestrationEventType::OrchestrationStart));
        assert_eq!(next(&mut rx).await, Some(OrchestrationEventType::OrchestrationStart));
    }

    #[tokio::test]
    async fn filter_skips_uninteresting_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = Recording {
            tx,
            only: Some(OrchestrationEventType::OrchestrationEnd),
        };
        let hub = ObserverHub::start(vec![Arc::new(observer)], 16, 16);
        let pe = PlanExecutionId::new();

        hub.publish(event(pe, OrchestrationEventType::OrchestrationStart));
        hub.publish(event(pe, OrchestrationEventType::OrchestrationEnd));
        assert_eq!(next(&mut rx).await, Some(OrchestrationEventType::OrchestrationEnd));
    }

    #[tokio::test]
    async fn published_events_reach_bus_subscribers() {
        let hub = ObserverHub::start(Vec::new(), 16, 16);
        let mut sub = hub.subscribe();

        hub.publish(event(PlanExecutionId::new(), OrchestrationEventType::EngineFault));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.event_type, OrchestrationEventType::EngineFault);
        assert_eq!(hub.event_bus().total_emitted(), 1);
    }
}
