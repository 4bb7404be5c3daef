//! Internal wake-ups routed back into the driver.
//!
//! Timers and the constraint engine never call the driver directly. They
//! send a [`Signal`]; a listener task hands each one to the driver on its
//! own task.

use std::sync::Weak;

use serde_json::Value;
use stratus_core::{NodeExecutionId, TimeoutInstanceId};
use tokio::sync::mpsc;

use crate::driver::EngineInner;

#[derive(Debug)]
pub(crate) enum Signal {
    /// A callback for `correlation_id`, as if delivered through the public API.
    Callback {
        correlation_id: String,
        response: Value,
    },
    /// A timeout tracker reached its deadline.
    TimeoutFired {
        timeout_instance_id: TimeoutInstanceId,
        node_execution_id: NodeExecutionId,
    },
}

pub(crate) type SignalSender = mpsc::UnboundedSender<Signal>;

/// Runs until every sender is gone or the engine is dropped.
pub(crate) fn spawn_listener(engine: Weak<EngineInner>, mut receiver: mpsc::UnboundedReceiver<Signal>) {
    tokio::spawn(async move {
        while let Some(signal) = receiver.recv().await {
            let Some(inner) = engine.upgrade() else {
                break;
            };
            tokio::spawn(inner.handle_signal(signal));
        }
        tracing::debug!("signal listener stopped");
    });
}
