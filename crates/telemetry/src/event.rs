//! Orchestration events and the broadcast event bus.
//!
//! Uses [`tokio::sync::broadcast`] for fan-out delivery to multiple subscribers.
//! Events are fire-and-forget projections -- dropping them is acceptable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{Ambiance, NodeExecutionId, PlanExecutionId, Status};
use tokio::sync::broadcast;

/// Kind of orchestration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    /// A plan execution started. Published once per plan execution.
    OrchestrationStart,
    /// A plan execution ended. Published once per plan execution.
    OrchestrationEnd,
    /// A node execution started.
    NodeExecutionStart,
    /// A node execution concluded.
    NodeExecutionEnd,
    /// The engine failed a node because of its own fault.
    EngineFault,
}

impl OrchestrationEventType {
    /// Returns `true` for the types published at most once per plan execution.
    #[must_use]
    pub fn is_once_per_plan(self) -> bool {
        matches!(self, Self::OrchestrationStart | Self::OrchestrationEnd)
    }
}

impl fmt::Display for OrchestrationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OrchestrationStart => "ORCHESTRATION_START",
            Self::OrchestrationEnd => "ORCHESTRATION_END",
            Self::NodeExecutionStart => "NODE_EXECUTION_START",
            Self::NodeExecutionEnd => "NODE_EXECUTION_END",
            Self::EngineFault => "ENGINE_FAULT",
        };
        f.write_str(name)
    }
}

/// Orchestration lifecycle event.
///
/// These events are emitted by the engine as executions progress.
/// They are projections, **not** the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    /// Kind of event.
    pub event_type: OrchestrationEventType,
    /// Context of the plan or node the event is about.
    pub ambiance: Ambiance,
    /// Node execution, for node-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<NodeExecutionId>,
    /// Status reached, for end events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Human-readable detail, used by fault events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the event was produced.
    pub at: DateTime<Utc>,
}

impl OrchestrationEvent {
    /// Creates an event of `event_type` for `ambiance`.
    #[must_use]
    pub fn new(event_type: OrchestrationEventType, ambiance: Ambiance) -> Self {
        Self {
            event_type,
            ambiance,
            node_execution_id: None,
            status: None,
            message: None,
            at: Utc::now(),
        }
    }

    /// Sets the node execution.
    #[must_use]
    pub fn with_node_execution(mut self, id: NodeExecutionId) -> Self {
        self.node_execution_id = Some(id);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Plan execution the event belongs to.
    #[must_use]
    pub fn plan_execution_id(&self) -> PlanExecutionId {
        self.ambiance.plan_execution_id()
    }
}

/// Broadcast-based event bus.
///
/// Delivers events to all active subscribers. If no subscribers are
/// listening, events are silently dropped (fire-and-forget).
///
/// # Examples
///
/// ```
/// use stratus_core::{Ambiance, PlanExecutionId, PlanId};
/// use stratus_telemetry::event::{EventBus, OrchestrationEvent, OrchestrationEventType};
///
/// let bus = EventBus::new(64);
/// let mut sub = bus.subscribe();
///
/// let ambiance = Ambiance::new(PlanExecutionId::new(), PlanId::new());
/// bus.emit(OrchestrationEvent::new(OrchestrationEventType::OrchestrationStart, ambiance));
///
/// assert!(sub.try_recv().is_some());
/// assert_eq!(bus.total_emitted(), 1);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    ///
    /// When the channel is full, the oldest events are dropped (lagging
    /// subscribers skip ahead).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns silently if there are no active subscribers.
    pub fn emit(&self, event: OrchestrationEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Total number of events emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("emitted", &self.total_emitted())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Subscription handle for receiving events from the [`EventBus`].
pub struct EventSubscriber {
    receiver: broadcast::Receiver<OrchestrationEvent>,
}

impl EventSubscriber {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` once the bus has been dropped. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<OrchestrationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is immediately available.
    pub fn try_recv(&mut self) -> Option<OrchestrationEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscriber").finish_non_exhaustive()
    }
}
