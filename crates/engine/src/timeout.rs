//! Timeout engine.
//!
//! Each timeout obtainment of a node becomes a timeout instance with its own
//! timer task. When a timer reaches its deadline it sends
//! [`Signal::TimeoutFired`]; the driver turns that into a CUSTOM_FAILURE
//! interrupt that expires the node. Conclusion cancels every instance of the
//! node, so a late timer finds nothing to fire.
//!
//! `ACTIVE` instances stop counting while their node is paused; `ABSOLUTE`
//! instances ignore pauses.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use stratus_core::{NodeExecutionId, TimeoutInstanceId};
use stratus_plan::{TimeoutObtainment, TimeoutTrackerType};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::EngineError;
use crate::signal::{Signal, SignalSender};

/// Deadline declared by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSpec {
    /// Time until expiry.
    pub duration: Duration,
    /// Whether the clock stops while the node is paused.
    pub pausable: bool,
}

/// Turns timeout obtainment parameters into a deadline.
pub trait TimeoutTracker: Send + Sync {
    /// `default` applies when the parameters name no duration.
    ///
    /// # Errors
    ///
    /// Unreadable parameters.
    fn create(&self, parameters: &Value, default: Duration) -> Result<TimeoutSpec, EngineError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeoutParameters {
    timeout_ms: Option<u64>,
}

fn read_duration(component: &str, parameters: &Value, default: Duration) -> Result<Duration, EngineError> {
    if parameters.is_null() {
        return Ok(default);
    }
    let params: TimeoutParameters = serde_json::from_value(parameters.clone())
        .map_err(|e| EngineError::invalid_parameters(component, e.to_string()))?;
    Ok(params.timeout_ms.map_or(default, Duration::from_millis))
}

/// Wall-clock deadline from the moment the node starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsoluteTimeoutTracker;

impl TimeoutTracker for AbsoluteTimeoutTracker {
    fn create(&self, parameters: &Value, default: Duration) -> Result<TimeoutSpec, EngineError> {
        Ok(TimeoutSpec {
            duration: read_duration("ABSOLUTE", parameters, default)?,
            pausable: false,
        })
    }
}

/// Deadline counting only the time the node is not paused.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveTimeoutTracker;

impl TimeoutTracker for ActiveTimeoutTracker {
    fn create(&self, parameters: &Value, default: Duration) -> Result<TimeoutSpec, EngineError> {
        Ok(TimeoutSpec {
            duration: read_duration("ACTIVE", parameters, default)?,
            pausable: true,
        })
    }
}

struct Entry {
    node_execution_id: NodeExecutionId,
    remaining: Duration,
    pausable: bool,
    armed: bool,
    armed_at: Instant,
    timer: Option<AbortHandle>,
}

pub(crate) struct TimeoutEngine {
    trackers: DashMap<TimeoutTrackerType, Arc<dyn TimeoutTracker>>,
    entries: DashMap<TimeoutInstanceId, Entry>,
    signals: SignalSender,
    default_timeout: Duration,
}

impl TimeoutEngine {
    pub(crate) fn new(signals: SignalSender, default_timeout: Duration) -> Self {
        let engine = Self {
            trackers: DashMap::new(),
            entries: DashMap::new(),
            signals,
            default_timeout,
        };
        engine.register_tracker(TimeoutTrackerType::ABSOLUTE, Arc::new(AbsoluteTimeoutTracker));
        engine.register_tracker(TimeoutTrackerType::ACTIVE, Arc::new(ActiveTimeoutTracker));
        engine
    }

    pub(crate) fn register_tracker(&self, tracker_type: TimeoutTrackerType, tracker: Arc<dyn TimeoutTracker>) {
        self.trackers.insert(tracker_type, tracker);
    }

    /// Starts one timer per obtainment.
    ///
    /// Every obtainment is resolved before any timer starts, so an error
    /// leaves nothing armed.
    pub(crate) fn register(
        &self,
        node_execution_id: NodeExecutionId,
        obtainments: &[TimeoutObtainment],
    ) -> Result<Vec<TimeoutInstanceId>, EngineError> {
        let mut specs = Vec::with_capacity(obtainments.len());
        for obtainment in obtainments {
            let tracker = self
                .trackers
                .get(&obtainment.tracker_type)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| EngineError::UnknownTimeoutTracker {
                    tracker_type: obtainment.tracker_type.to_string(),
                })?;
            specs.push(tracker.create(&obtainment.parameters, self.default_timeout)?);
        }

        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = TimeoutInstanceId::new();
            self.entries.insert(
                id,
                Entry {
                    node_execution_id,
                    remaining: spec.duration,
                    pausable: spec.pausable,
                    armed: false,
                    armed_at: Instant::now(),
                    timer: None,
                },
            );
            self.arm(id);
            tracing::debug!(
                node_execution_id = %node_execution_id,
                timeout_instance_id = %id,
                timeout_ms = spec.duration.as_millis() as u64,
                pausable = spec.pausable,
                "timeout armed"
            );
            ids.push(id);
        }
        Ok(ids)
    }

    fn arm(&self, id: TimeoutInstanceId) {
        let Some(mut entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.armed {
            return;
        }
        entry.armed = true;
        entry.armed_at = Instant::now();
        let remaining = entry.remaining;
        let node_execution_id = entry.node_execution_id;
        let signals = self.signals.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            // The engine may be gone already.
            let _ = signals.send(Signal::TimeoutFired {
                timeout_instance_id: id,
                node_execution_id,
            });
        });
        entry.timer = Some(task.abort_handle());
    }

    /// Stops and forgets the given instances.
    pub(crate) fn cancel(&self, ids: &[TimeoutInstanceId]) {
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(id)
                && let Some(timer) = entry.timer
            {
                timer.abort();
            }
        }
    }

    /// Stops the clock of pausable instances.
    pub(crate) fn pause(&self, ids: &[TimeoutInstanceId]) {
        for id in ids {
            let Some(mut entry) = self.entries.get_mut(id) else {
                continue;
            };
            if !entry.pausable || !entry.armed {
                continue;
            }
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            entry.armed = false;
            entry.remaining = entry.remaining.saturating_sub(entry.armed_at.elapsed());
        }
    }

    /// Restarts the clock of paused instances with their remaining time.
    pub(crate) fn resume(&self, ids: &[TimeoutInstanceId]) {
        for id in ids {
            self.arm(*id);
        }
    }

    /// Claims a fired instance. `false` means it was cancelled or paused
    /// after the timer went off.
    pub(crate) fn fire(&self, id: TimeoutInstanceId) -> bool {
        self.entries.remove_if(&id, |_, entry| entry.armed).is_some()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn engine() -> (TimeoutEngine, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimeoutEngine::new(tx, Duration::from_secs(3600)), rx)
    }

    fn obtainment(tracker_type: TimeoutTrackerType, millis: u64) -> TimeoutObtainment {
        TimeoutObtainment::new(tracker_type).with_parameters(json!({"timeout_ms": millis}))
    }

    async fn next_fired(rx: &mut mpsc::UnboundedReceiver<Signal>, within: Duration) -> Option<TimeoutInstanceId> {
        match tokio::time::timeout(within, rx.recv()).await {
            Ok(Some(Signal::TimeoutFired {
                timeout_instance_id, ..
            })) => Some(timeout_instance_id),
            _ => None,
        }
    }

    #[test]
    fn trackers_read_duration_or_default() {
        let default = Duration::from_secs(9);
        let absolute = AbsoluteTimeoutTracker.create(&json!({"timeout_ms": 40}), default).unwrap();
        assert_eq!(
            absolute,
            TimeoutSpec {
                duration: Duration::from_millis(40),
                pausable: false
            }
        );
        let active = ActiveTimeoutTracker.create(&Value::Null, default).unwrap();
        assert_eq!(active.duration, default);
        assert!(active.pausable);
        assert!(AbsoluteTimeoutTracker.create(&json!({"timeout_ms": "x"}), default).is_err());
    }

    #[tokio::test]
    async fn fires_once_after_deadline() {
        let (engine, mut rx) = engine();
        let node = NodeExecutionId::new();
        let ids = engine
            .register(node, &[obtainment(TimeoutTrackerType::ABSOLUTE, 20)])
            .unwrap();

        let fired = next_fired(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(fired, Some(ids[0]));
        assert!(engine.fire(ids[0]));
        assert!(!engine.fire(ids[0]));
    }

    #[tokio::test]
    async fn cancel_stops_timer() {
        let (engine, mut rx) = engine();
        let ids = engine
            .register(NodeExecutionId::new(), &[obtainment(TimeoutTrackerType::ABSOLUTE, 30)])
            .unwrap();
        engine.cancel(&ids);
        assert_eq!(engine.len(), 0);
        assert_eq!(next_fired(&mut rx, Duration::from_millis(100)).await, None);
        assert!(!engine.fire(ids[0]));
    }

    #[tokio::test]
    async fn active_timer_stops_while_paused() {
        let (engine, mut rx) = engine();
        let ids = engine
            .register(NodeExecutionId::new(), &[obtainment(TimeoutTrackerType::ACTIVE, 60)])
            .unwrap();
        engine.pause(&ids);
        assert_eq!(next_fired(&mut rx, Duration::from_millis(120)).await, None);
        assert!(!engine.fire(ids[0]));

        engine.resume(&ids);
        assert_eq!(next_fired(&mut rx, Duration::from_millis(500)).await, Some(ids[0]));
        assert!(engine.fire(ids[0]));
    }

    #[tokio::test]
    async fn absolute_timer_ignores_pause() {
        let (engine, mut rx) = engine();
        let ids = engine
            .register(NodeExecutionId::new(), &[obtainment(TimeoutTrackerType::ABSOLUTE, 20)])
            .unwrap();
        engine.pause(&ids);
        assert_eq!(next_fired(&mut rx, Duration::from_millis(500)).await, Some(ids[0]));
    }

    #[test]
    fn unknown_tracker_arms_nothing() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = TimeoutEngine::new(tx, Duration::from_secs(1));
        let err = engine
            .register(
                NodeExecutionId::new(),
                &[
                    obtainment(TimeoutTrackerType::ABSOLUTE, 10),
                    obtainment(TimeoutTrackerType::new("LUNAR"), 10),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTimeoutTracker { .. }));
        assert_eq!(engine.len(), 0);
    }
}
