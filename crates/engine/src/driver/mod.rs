//! The orchestration driver.
//!
//! Every mutation of a node execution happens while holding that node's
//! guard from [`KeyedLocks`]. Functions suffixed `_locked` expect the caller
//! to hold the guard of the node execution they are handed, and to have
//! loaded it after taking the guard.
//!
//! Work that would take a guard earlier in the lock order (a new node, a
//! retried attempt, an adviser-raised interrupt) is spawned onto its own task.

mod advance;
mod dispatch;
mod start;

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use stratus_core::{NodeExecutionId, PlanExecutionId, PlanNodeId};
use stratus_execution::{
    CustomFailure, ExecutionMode, FailureInfo, IssuedBy, NodeExecution, PlanExecution, StepResponse,
};
use stratus_plan::{Plan, PlanNode};
use stratus_ports::{InterruptRepo, NodeExecutionRepo, PlanExecutionRepo, TaskDispatcher};
use stratus_step::{Executable, StepContext, StepError, StepRegistry};
use stratus_telemetry::metrics::names;
use stratus_telemetry::{MetricsRegistry, ObserverHub, OrchestrationEvent, OrchestrationEventType};
use tokio::sync::OwnedMutexGuard;

use crate::advise::AdviserRegistry;
use crate::callback::{Arrival, CallbackRegistry};
use crate::config::EngineConfig;
use crate::constraint::ResourceConstraintEngine;
use crate::error::EngineError;
use crate::facilitate::FacilitatorRegistry;
use crate::interrupt::InterruptRequest;
use crate::lock::KeyedLocks;
use crate::signal::Signal;
use crate::timeout::TimeoutEngine;

pub(crate) use start::NodeStart;

/// Shared state behind [`OrchestrationEngine`](crate::OrchestrationEngine).
pub(crate) struct EngineInner {
    pub(crate) node_executions: Arc<dyn NodeExecutionRepo>,
    pub(crate) plan_executions: Arc<dyn PlanExecutionRepo>,
    pub(crate) interrupts: Arc<dyn InterruptRepo>,
    pub(crate) steps: StepRegistry,
    pub(crate) task_dispatcher: Option<Arc<dyn TaskDispatcher>>,
    pub(crate) facilitators: FacilitatorRegistry,
    pub(crate) advisers: AdviserRegistry,
    pub(crate) timeouts: TimeoutEngine,
    pub(crate) constraints: Arc<ResourceConstraintEngine>,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) plans: DashMap<PlanExecutionId, Arc<Plan>>,
    /// Ended plan executions still held in `plans`, oldest first.
    pub(crate) ended_plans: Mutex<VecDeque<PlanExecutionId>>,
    pub(crate) node_locks: KeyedLocks<NodeExecutionId>,
    pub(crate) plan_locks: KeyedLocks<PlanExecutionId>,
    pub(crate) hub: ObserverHub,
    pub(crate) metrics: MetricsRegistry,
    pub(crate) config: EngineConfig,
}

impl EngineInner {
    pub(crate) fn plan(&self, id: PlanExecutionId) -> Result<Arc<Plan>, EngineError> {
        self.plans
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::PlanExecutionNotFound { id })
    }

    pub(crate) async fn load(&self, id: NodeExecutionId) -> Result<NodeExecution, EngineError> {
        self.node_executions
            .get(id)
            .await?
            .ok_or(EngineError::NodeExecutionNotFound { id })
    }

    pub(crate) async fn load_plan_execution(&self, id: PlanExecutionId) -> Result<PlanExecution, EngineError> {
        self.plan_executions
            .get(id)
            .await?
            .ok_or(EngineError::PlanExecutionNotFound { id })
    }

    /// Writes `ne` back and bumps its local version.
    pub(crate) async fn save(&self, ne: &mut NodeExecution) -> Result<(), EngineError> {
        ne.updated_at = chrono::Utc::now();
        if !self.node_executions.replace(ne.version, ne.clone()).await? {
            return Err(EngineError::ConcurrentModification {
                entity: "NodeExecution",
                id: ne.uuid.to_string(),
            });
        }
        ne.version += 1;
        Ok(())
    }

    pub(crate) async fn save_plan_execution(&self, pe: &mut PlanExecution) -> Result<(), EngineError> {
        if !self.plan_executions.replace(pe.version, pe.clone()).await? {
            return Err(EngineError::ConcurrentModification {
                entity: "PlanExecution",
                id: pe.uuid.to_string(),
            });
        }
        pe.version += 1;
        Ok(())
    }

    pub(crate) async fn lock_node(&self, id: NodeExecutionId) -> OwnedMutexGuard<()> {
        self.node_locks.lock(id).await
    }

    pub(crate) fn unlock(&self, id: NodeExecutionId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.node_locks.release_idle(&id);
    }

    /// The registered step for `node`, checked against the chosen mode.
    pub(crate) fn executable(&self, node: &PlanNode, mode: ExecutionMode) -> Result<Executable, EngineError> {
        let executable = self.steps.get(&node.step_type.type_name).map_err(|_| {
            EngineError::UnknownStep {
                step_type: node.step_type.type_name.clone(),
            }
        })?;
        if executable.mode() != mode {
            return Err(EngineError::ModeMismatch {
                step_type: node.step_type.type_name.clone(),
                expected: mode,
                actual: executable.mode(),
            });
        }
        Ok(executable)
    }

    /// Builds the step context, resolving declared data dependencies.
    pub(crate) async fn step_context(
        &self,
        ne: &NodeExecution,
        node: &PlanNode,
    ) -> Result<StepContext, EngineError> {
        let mut inputs = std::collections::BTreeMap::new();
        for ref_object in &node.ref_objects {
            let producer = self
                .node_executions
                .latest_for_node(ne.plan_execution_id(), ref_object.producer_id)
                .await?;
            let value = producer
                .and_then(|producer| producer.step_response)
                .and_then(|response| response.outcomes.get(&ref_object.key).cloned());
            match value {
                Some(value) => {
                    inputs.insert(ref_object.name.clone(), value);
                }
                None => tracing::debug!(
                    node_execution_id = %ne.uuid,
                    ref_object = %ref_object.name,
                    "ref object has no value yet"
                ),
            }
        }
        Ok(StepContext::new(
            ne.ambiance.clone(),
            ne.uuid,
            ne.node_id,
            node.step_parameters.clone(),
        )
        .with_inputs(inputs))
    }

    pub(crate) fn node_event(
        &self,
        event_type: OrchestrationEventType,
        ne: &NodeExecution,
    ) -> OrchestrationEvent {
        OrchestrationEvent::new(event_type, ne.ambiance.clone())
            .with_node_execution(ne.uuid)
            .with_status(ne.status)
    }

    /// Turns an engine fault into a FAILED node; other errors pass through.
    pub(crate) async fn absorb_fault(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        result: Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        match result {
            Err(err) if err.is_engine_fault() && !ne.is_terminal() => {
                self.fail_with_fault_locked(ne, err).await
            }
            other => other,
        }
    }

    pub(crate) async fn fail_with_fault_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        err: EngineError,
    ) -> Result<(), EngineError> {
        tracing::error!(
            node_execution_id = %ne.uuid,
            identifier = %ne.identifier,
            error = %err,
            "engine fault"
        );
        self.metrics.counter(names::ENGINE_FAULTS).inc();
        self.hub.publish(
            self.node_event(OrchestrationEventType::EngineFault, ne)
                .with_message(err.to_string()),
        );
        ne.step_response = Some(StepResponse::failed(FailureInfo::engine_fault(
            err.to_string(),
        )));
        self.conclude_locked(ne, stratus_core::Status::Failed, None).await
    }

    /// Starts a node on its own task.
    pub(crate) fn spawn_start(self: &Arc<Self>, start: NodeStart) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let uuid = start.uuid;
            let parent_id = start.parent_id;
            let node_id = start.node_id;
            let plan_execution_id = start.ambiance.plan_execution_id();
            if let Err(err) = inner.run_start(start).await {
                inner
                    .start_failed(plan_execution_id, uuid, node_id, parent_id, err)
                    .await;
            }
        });
    }

    async fn start_failed(
        self: &Arc<Self>,
        plan_execution_id: PlanExecutionId,
        uuid: NodeExecutionId,
        node_id: PlanNodeId,
        parent_id: Option<NodeExecutionId>,
        err: EngineError,
    ) {
        let not_admitted = matches!(err, EngineError::NotAdmitted { .. });
        if not_admitted {
            tracing::debug!(node_execution_id = %uuid, reason = %err, "node start not admitted");
        } else {
            tracing::error!(node_execution_id = %uuid, error = %err, "node start failed");
        }

        let result = match parent_id {
            Some(parent_id) => {
                let (status, failure_info) = if not_admitted {
                    (stratus_core::Status::Aborted, None)
                } else {
                    (
                        stratus_core::Status::Failed,
                        Some(FailureInfo::engine_fault(err.to_string())),
                    )
                };
                let outcome = stratus_execution::ChildOutcome {
                    node_execution_id: uuid,
                    node_id,
                    status,
                    failure_info,
                    outcomes: std::collections::BTreeMap::new(),
                };
                self.on_child_concluded(parent_id, outcome).await
            }
            None if !not_admitted => {
                self.finish_plan(plan_execution_id, stratus_core::Status::Errored)
                    .await
            }
            None => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!(node_execution_id = %uuid, error = %err, "could not report failed start");
        }
    }

    /// Applies the deferred action of a node once it may proceed.
    pub(crate) fn settle(self: &Arc<Self>, id: NodeExecutionId) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let guard = self.lock_node(id).await;
            let mut ne = match self.load(id).await {
                Ok(ne) => ne,
                Err(err) => {
                    self.unlock(id, guard);
                    return Err(err);
                }
            };
            let result = self.settle_locked(&mut ne).await;
            let result = self.absorb_fault(&mut ne, result).await;
            self.unlock(id, guard);
            result
        })
    }

    /// Entry point for [`Signal`]s from timers and the constraint engine.
    pub(crate) async fn handle_signal(self: Arc<Self>, signal: Signal) {
        match signal {
            Signal::Callback {
                correlation_id,
                response,
            } => {
                if let Err(err) = self.handle_callback(correlation_id.clone(), response).await {
                    tracing::warn!(correlation_id, error = %err, "internal callback failed");
                }
            }
            Signal::TimeoutFired {
                timeout_instance_id,
                node_execution_id,
            } => {
                if !self.timeouts.fire(timeout_instance_id) {
                    tracing::debug!(%timeout_instance_id, "timeout no longer armed");
                    return;
                }
                tracing::info!(%timeout_instance_id, %node_execution_id, "timeout fired");
                let result = async {
                    let ne = self.load(node_execution_id).await?;
                    let request = InterruptRequest::for_node(
                        stratus_execution::InterruptType::CustomFailure,
                        ne.plan_execution_id(),
                        node_execution_id,
                    )
                    .issued_by(IssuedBy::Timeout {
                        timeout_instance_id,
                    })
                    .with_custom_failure(CustomFailure::expired(format!(
                        "node {} timed out",
                        ne.identifier
                    )));
                    let interrupt = self.register_interrupt(request).await?;
                    self.process_interrupt(interrupt.uuid).await
                }
                .await;
                if let Err(err) = result {
                    tracing::warn!(%node_execution_id, error = %err, "timeout could not expire node");
                }
            }
        }
    }

    /// Delivers a callback response to the node waiting on it.
    ///
    /// The correlation id is marked delivered only once the node took it, so
    /// a delivery that fails here can be repeated by the sender.
    pub(crate) async fn handle_callback(
        self: &Arc<Self>,
        correlation_id: String,
        response: Value,
    ) -> Result<(), EngineError> {
        let (id, response) = match self.callbacks.arrive(correlation_id.clone(), response) {
            Arrival::Deliver {
                node_execution_id,
                response,
            } => (node_execution_id, response),
            Arrival::Stashed => {
                tracing::debug!(correlation_id, "callback held until a node waits for it");
                return Ok(());
            }
        };

        let guard = self.lock_node(id).await;
        let result = self.deliver_locked(id, &correlation_id, response).await;
        self.unlock(id, guard);
        result
    }

    async fn deliver_locked(
        self: &Arc<Self>,
        id: NodeExecutionId,
        correlation_id: &str,
        response: Value,
    ) -> Result<(), EngineError> {
        let mut ne = match self.load(id).await {
            Ok(ne) => ne,
            Err(err) => {
                self.callbacks.restore(correlation_id, id);
                return Err(err);
            }
        };
        let plan_execution_id = ne.plan_execution_id();
        if self.callbacks.is_delivered(plan_execution_id, correlation_id) {
            tracing::debug!(correlation_id, node_execution_id = %id, "duplicate callback ignored");
            return Ok(());
        }

        let result = self
            .callback_locked(&mut ne, correlation_id.to_owned(), response)
            .await;
        match self.absorb_fault(&mut ne, result).await {
            Ok(()) => {
                self.callbacks
                    .mark_delivered(plan_execution_id, correlation_id);
                Ok(())
            }
            Err(err) => {
                if !ne.is_terminal() {
                    self.callbacks.restore(correlation_id, id);
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("plans", &self.plans.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A FAILED response for an error raised by a step.
pub(crate) fn failed_response(err: StepError) -> StepResponse {
    StepResponse::failed(err.into_failure_info())
}

pub(crate) fn node_of(plan: &Plan, node_id: PlanNodeId) -> Result<&PlanNode, EngineError> {
    plan.node(node_id)
        .ok_or(EngineError::PlanNodeNotFound { node_id })
}
