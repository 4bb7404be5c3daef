use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use stratus_core::{Ambiance, Level, NodeExecutionId, PlanExecutionId, PlanNodeId, Status};
use stratus_execution::{DeferredAction, NodeExecution, StepResponse};
use stratus_plan::{PlanNode, SkipCondition};
use stratus_telemetry::OrchestrationEventType;
use stratus_telemetry::metrics::names;
use tokio::sync::OwnedMutexGuard;

use super::{EngineInner, node_of};
use crate::error::EngineError;

/// Everything needed to create a node execution.
#[derive(Debug, Clone)]
pub(crate) struct NodeStart {
    pub(crate) uuid: NodeExecutionId,
    /// Ambiance of the enclosing context, without the new node's level.
    pub(crate) ambiance: Ambiance,
    pub(crate) node_id: PlanNodeId,
    pub(crate) parent_id: Option<NodeExecutionId>,
    pub(crate) previous_id: Option<NodeExecutionId>,
    pub(crate) retry_ids: Vec<NodeExecutionId>,
    pub(crate) delay: Duration,
}

impl NodeStart {
    pub(crate) fn new(ambiance: Ambiance, node_id: PlanNodeId) -> Self {
        let parent_id = ambiance.current_runtime_id();
        Self {
            uuid: NodeExecutionId::new(),
            ambiance,
            node_id,
            parent_id,
            previous_id: None,
            retry_ids: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// The node that follows `previous` under the same parent.
    pub(crate) fn next(previous: &NodeExecution, node_id: PlanNodeId) -> Self {
        Self {
            uuid: NodeExecutionId::new(),
            ambiance: previous.ambiance.clone_for_finish(),
            node_id,
            parent_id: previous.parent_id,
            previous_id: Some(previous.uuid),
            retry_ids: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// A child spawned by `parent`.
    pub(crate) fn child(parent: &NodeExecution, node_id: PlanNodeId) -> Self {
        Self {
            uuid: NodeExecutionId::new(),
            ambiance: parent.ambiance.clone(),
            node_id,
            parent_id: Some(parent.uuid),
            previous_id: None,
            retry_ids: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// A fresh attempt replacing `old`.
    pub(crate) fn retry(old: &NodeExecution) -> Self {
        let mut retry_ids = old.retry_ids.clone();
        retry_ids.push(old.uuid);
        Self {
            uuid: NodeExecutionId::new(),
            ambiance: old.ambiance.clone_for_finish(),
            node_id: old.node_id,
            parent_id: old.parent_id,
            previous_id: old.previous_id,
            retry_ids,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Whether a new node may start, and whether it starts paused.
enum Admission {
    Run,
    Paused,
}

impl EngineInner {
    /// Creates the node execution for `start` and dispatches it.
    pub(crate) fn run_start(self: &Arc<Self>, start: NodeStart) -> BoxFuture<'_, Result<NodeExecutionId, EngineError>> {
        Box::pin(async move {
            if !start.delay.is_zero() {
                tokio::time::sleep(start.delay).await;
            }
            let plan_execution_id = start.ambiance.plan_execution_id();
            let parent_id = start.parent_id;
            let plan = self.plan(plan_execution_id)?;
            let node = node_of(&plan, start.node_id)?;

            // An abort marks the parent (or the plan) under this guard before
            // it collects live nodes, so the new record is either seen by it
            // or not admitted.
            let scope = self.lock_start_scope(parent_id, plan_execution_id).await;
            let admission = match self.admit(&start).await {
                Ok(admission) => admission,
                Err(err) => {
                    self.unlock_start_scope(parent_id, plan_execution_id, scope);
                    return Err(err);
                }
            };

            let level = Level::new(
                start.uuid,
                node.uuid,
                node.identifier.clone(),
                node.step_type.clone(),
            )
            .with_retry_index(u32::try_from(start.retry_ids.len()).unwrap_or(u32::MAX));
            let mut ne = NodeExecution::new(
                start.uuid,
                node.uuid,
                node.identifier.clone(),
                start.ambiance.clone_for_child(level),
            )
            .with_parent(start.parent_id)
            .with_previous(start.previous_id)
            .with_retry_ids(start.retry_ids);

            let guard = self.lock_node(ne.uuid).await;
            let inserted = self.node_executions.insert(ne.clone()).await;
            self.unlock_start_scope(parent_id, plan_execution_id, scope);
            if let Err(err) = inserted {
                self.unlock(ne.uuid, guard);
                return Err(err.into());
            }
            self.metrics.counter(names::NODE_EXECUTIONS_STARTED).inc();
            self.metrics.gauge(names::NODE_EXECUTIONS_ACTIVE).inc();
            self.hub
                .publish(self.node_event(OrchestrationEventType::NodeExecutionStart, &ne));
            tracing::info!(
                node_execution_id = %ne.uuid,
                identifier = %ne.identifier,
                step_type = %node.step_type.type_name,
                retry_index = ne.retry_ids.len(),
                "node execution started"
            );

            let result = self
                .begin_locked(&mut ne, node, matches!(admission, Admission::Paused))
                .await;
            let result = self.absorb_fault(&mut ne, result).await;
            self.unlock(ne.uuid, guard);
            result.map(|()| ne.uuid)
        })
    }

    async fn lock_start_scope(
        &self,
        parent_id: Option<NodeExecutionId>,
        plan_execution_id: PlanExecutionId,
    ) -> OwnedMutexGuard<()> {
        match parent_id {
            Some(parent_id) => self.lock_node(parent_id).await,
            None => self.plan_locks.lock(plan_execution_id).await,
        }
    }

    fn unlock_start_scope(
        &self,
        parent_id: Option<NodeExecutionId>,
        plan_execution_id: PlanExecutionId,
        guard: OwnedMutexGuard<()>,
    ) {
        match parent_id {
            Some(parent_id) => self.unlock(parent_id, guard),
            None => {
                drop(guard);
                self.plan_locks.release_idle(&plan_execution_id);
            }
        }
    }

    async fn admit(&self, start: &NodeStart) -> Result<Admission, EngineError> {
        let plan_execution = self
            .load_plan_execution(start.ambiance.plan_execution_id())
            .await?;
        if plan_execution.status.is_terminal() || plan_execution.status == Status::Discontinuing {
            return Err(EngineError::not_admitted(
                start.uuid,
                format!("plan execution is {}", plan_execution.status),
            ));
        }
        let mut paused = plan_execution.status == Status::Paused;

        if let Some(parent_id) = start.parent_id {
            let parent = self.load(parent_id).await?;
            if parent.is_terminal() || parent.status == Status::Discontinuing {
                return Err(EngineError::not_admitted(
                    start.uuid,
                    format!("parent is {}", parent.status),
                ));
            }
            paused |= parent.status == Status::Paused;
        }
        Ok(if paused {
            Admission::Paused
        } else {
            Admission::Run
        })
    }

    async fn should_skip(&self, ne: &NodeExecution, node: &PlanNode) -> Result<bool, EngineError> {
        match &node.skip_condition {
            None => Ok(false),
            Some(SkipCondition::Always) => Ok(true),
            Some(SkipCondition::PreviousStatusIn { statuses }) => match ne.previous_id {
                Some(previous_id) => {
                    let previous = self.load(previous_id).await?;
                    Ok(statuses.contains(&previous.status))
                }
                None => Ok(false),
            },
        }
    }

    async fn begin_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        node: &PlanNode,
        paused: bool,
    ) -> Result<(), EngineError> {
        if self.should_skip(ne, node).await? {
            tracing::info!(node_execution_id = %ne.uuid, identifier = %ne.identifier, "node skipped");
            return self
                .process_step_response_locked(ne, StepResponse::skipped())
                .await;
        }

        let facilitation = self.facilitators.facilitate(
            &node.facilitator_obtainment.facilitator_type,
            &ne.ambiance,
            &node.facilitator_obtainment.parameters,
        )?;
        self.executable(node, facilitation.mode)?;
        ne.timeout_instance_ids = self.timeouts.register(ne.uuid, &node.timeout_obtainments)?;
        ne.mode = Some(facilitation.mode);

        if paused {
            ne.transition_to(Status::Paused)?;
            ne.paused_from = Some(Status::Running);
            ne.progress.deferred = Some(DeferredAction::Dispatch);
            self.timeouts.pause(&ne.timeout_instance_ids);
            return self.save(ne).await;
        }

        ne.transition_to(Status::Running)?;
        if facilitation.initial_wait.is_zero() {
            self.save(ne).await?;
            self.dispatch_locked(ne).await
        } else {
            ne.progress.deferred = Some(DeferredAction::Dispatch);
            self.save(ne).await?;
            self.spawn_settle(ne.uuid, facilitation.initial_wait);
            Ok(())
        }
    }

    /// Applies the deferred action of `id` after `delay`.
    pub(crate) fn spawn_settle(self: &Arc<Self>, id: NodeExecutionId, delay: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = inner.settle(id).await {
                tracing::warn!(node_execution_id = %id, error = %err, "deferred dispatch failed");
            }
        });
    }
}
