//! Advising, concluding and moving on.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use stratus_core::{Ambiance, NodeExecutionId, PlanExecutionId, PlanNodeId, Status};
use stratus_execution::{
    ChildOutcome, DeferredAction, InterruptType, IssuedBy, NodeExecution, PlanExecution,
    StepResponse,
};
use stratus_telemetry::OrchestrationEventType;
use stratus_telemetry::metrics::names;

use super::{EngineInner, NodeStart, node_of};
use crate::advise::{AdviserResponse, AdvisingEvent};
use crate::error::EngineError;
use crate::interrupt::InterruptRequest;

impl EngineInner {
    /// Runs the adviser chain over a step response and acts on the advice.
    pub(crate) async fn process_step_response_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        response: StepResponse,
    ) -> Result<(), EngineError> {
        self.timeouts.cancel(&ne.timeout_instance_ids);
        let plan = self.plan(ne.plan_execution_id())?;
        let node = node_of(&plan, ne.node_id)?;
        let advice = self.advisers.resolve(
            &node.adviser_obtainments,
            &AdvisingEvent {
                ambiance: &ne.ambiance,
                node_execution_id: ne.uuid,
                step_response: &response,
                parameters: &Value::Null,
                retry_count: u32::try_from(ne.retry_ids.len()).unwrap_or(u32::MAX),
            },
        )?;
        let status = response.status;
        ne.step_response = Some(response);

        match advice {
            None => self.conclude_locked(ne, status, None).await,
            Some(AdviserResponse::NextStep { next_node_id }) => {
                self.conclude_locked(ne, status, next_node_id).await
            }
            Some(AdviserResponse::MarkSuccess { next_node_id }) => {
                self.conclude_locked(ne, Status::Succeeded, next_node_id)
                    .await
            }
            Some(AdviserResponse::EndNode { status }) => self.conclude_locked(ne, status, None).await,
            Some(AdviserResponse::Retry { wait }) => self.retry_locked(ne, status, wait).await,
            Some(AdviserResponse::InterventionWait { next_node_id }) => {
                ne.progress.intervention_next = next_node_id;
                ne.transition_to(Status::InterventionWaiting)?;
                self.save(ne).await?;
                tracing::info!(
                    node_execution_id = %ne.uuid,
                    identifier = %ne.identifier,
                    "node waiting for manual intervention"
                );
                Ok(())
            }
            Some(AdviserResponse::Interrupt { interrupt_type }) => {
                ne.progress.deferred = Some(DeferredAction::Conclude {
                    status,
                    next_node_id: None,
                });
                self.save(ne).await?;
                self.spawn_adviser_interrupt(ne, interrupt_type);
                Ok(())
            }
        }
    }

    fn spawn_adviser_interrupt(self: &Arc<Self>, ne: &NodeExecution, interrupt_type: InterruptType) {
        let inner = Arc::clone(self);
        let id = ne.uuid;
        let request = InterruptRequest::for_node(interrupt_type, ne.plan_execution_id(), id)
            .issued_by(IssuedBy::Adviser {
                node_execution_id: id,
            });
        tokio::spawn(async move {
            let result = async {
                let interrupt = inner.register_interrupt(request).await?;
                inner.process_interrupt(interrupt.uuid).await?;
                inner.settle(id).await
            }
            .await;
            if let Err(err) = result {
                tracing::warn!(node_execution_id = %id, %interrupt_type, error = %err, "adviser interrupt failed");
            }
        });
    }

    async fn retry_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        status: Status,
        wait: Duration,
    ) -> Result<(), EngineError> {
        if !status.is_terminal() {
            return Err(EngineError::NonTerminalStatus { status });
        }
        ne.old_retry = true;
        self.finish_attempt_locked(ne, status).await?;
        let start = NodeStart::retry(ne).after(wait);
        if let Some(parent_id) = ne.parent_id {
            self.replace_pending_child(parent_id, ne.uuid, start.uuid)
                .await?;
        }
        tracing::info!(
            node_execution_id = %ne.uuid,
            identifier = %ne.identifier,
            retry_node_execution_id = %start.uuid,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "retrying node"
        );
        self.spawn_start(start);
        Ok(())
    }

    /// Ends `ne` with `status` and advances to `next`, the parent or the plan.
    pub(crate) fn conclude_locked<'a>(
        self: &'a Arc<Self>,
        ne: &'a mut NodeExecution,
        status: Status,
        next: Option<PlanNodeId>,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            if ne.is_terminal() {
                return Err(EngineError::AlreadyConcluded { id: ne.uuid });
            }
            if !status.is_terminal() {
                return Err(EngineError::NonTerminalStatus { status });
            }
            let next_start = next.map(|node_id| NodeStart::next(ne, node_id));
            ne.next_id = next_start.as_ref().map(|start| start.uuid);
            self.finish_attempt_locked(ne, status).await?;

            match (next_start, ne.parent_id) {
                (Some(start), parent_id) => {
                    if let Some(parent_id) = parent_id {
                        self.replace_pending_child(parent_id, ne.uuid, start.uuid)
                            .await?;
                    }
                    self.spawn_start(start);
                    Ok(())
                }
                (None, Some(parent_id)) => self.on_child_concluded(parent_id, ne.child_outcome()).await,
                (None, None) => self.maybe_finish_plan(ne).await,
            }
        })
    }

    /// Moves `ne` to its terminal status and releases what it held.
    async fn finish_attempt_locked(&self, ne: &mut NodeExecution, status: Status) -> Result<(), EngineError> {
        if ne.step_response.is_none() {
            ne.step_response = Some(StepResponse::new(status));
        }
        ne.progress.deferred = None;
        ne.transition_to(status)?;
        self.save(ne).await?;
        self.timeouts.cancel(&ne.timeout_instance_ids);
        self.callbacks
            .forget_waits(ne.uuid, &ne.progress.callback_ids);

        if let Err(err) = self.constraints.abandon_blocked(ne.uuid).await {
            tracing::warn!(node_execution_id = %ne.uuid, error = %err, "could not abandon blocked constraints");
        }
        if let Err(err) = self.constraints.release_for_entity(&ne.uuid.to_string()).await {
            tracing::warn!(node_execution_id = %ne.uuid, error = %err, "could not release held constraints");
        }

        self.metrics.counter(names::NODE_EXECUTIONS_CONCLUDED).inc();
        self.metrics.gauge(names::NODE_EXECUTIONS_ACTIVE).dec();
        self.hub
            .publish(self.node_event(OrchestrationEventType::NodeExecutionEnd, ne));
        tracing::info!(
            node_execution_id = %ne.uuid,
            identifier = %ne.identifier,
            %status,
            "node execution concluded"
        );
        Ok(())
    }

    /// Records a concluded child on its parent.
    pub(crate) async fn on_child_concluded(
        self: &Arc<Self>,
        parent_id: NodeExecutionId,
        outcome: ChildOutcome,
    ) -> Result<(), EngineError> {
        let guard = self.lock_node(parent_id).await;
        let mut parent = match self.load(parent_id).await {
            Ok(parent) => parent,
            Err(err) => {
                self.unlock(parent_id, guard);
                return Err(err);
            }
        };
        let result = self.child_concluded_locked(&mut parent, outcome).await;
        let result = self.absorb_fault(&mut parent, result).await;
        self.unlock(parent_id, guard);
        result
    }

    async fn child_concluded_locked(
        self: &Arc<Self>,
        parent: &mut NodeExecution,
        outcome: ChildOutcome,
    ) -> Result<(), EngineError> {
        if parent.is_terminal() {
            tracing::debug!(
                parent_id = %parent.uuid,
                child_id = %outcome.node_execution_id,
                "child concluded after its parent"
            );
            return Ok(());
        }
        let Some(position) = parent
            .progress
            .pending_children
            .iter()
            .position(|id| *id == outcome.node_execution_id)
        else {
            tracing::debug!(
                parent_id = %parent.uuid,
                child_id = %outcome.node_execution_id,
                "ignoring outcome of an untracked child"
            );
            return Ok(());
        };
        parent.progress.pending_children.remove(position);
        parent.progress.child_outcomes.push(outcome);

        let starts = match parent.status {
            Status::Discontinuing => {
                parent.progress.queued_children.clear();
                Vec::new()
            }
            Status::Paused => Vec::new(),
            _ => self.admit_queued_children(parent),
        };

        if !parent.progress.children_complete() {
            self.save(parent).await?;
            for start in starts {
                self.spawn_start(start);
            }
            return Ok(());
        }
        match parent.status {
            Status::Discontinuing => self.save(parent).await,
            Status::Paused => {
                parent.progress.deferred = Some(DeferredAction::Continue);
                self.save(parent).await
            }
            _ => {
                self.save(parent).await?;
                self.continue_locked(parent).await
            }
        }
    }

    /// Points the parent at a retried or following node execution.
    async fn replace_pending_child(
        &self,
        parent_id: NodeExecutionId,
        old: NodeExecutionId,
        new: NodeExecutionId,
    ) -> Result<(), EngineError> {
        let guard = self.lock_node(parent_id).await;
        let result = async {
            let mut parent = self.load(parent_id).await?;
            if parent.is_terminal() {
                return Ok(());
            }
            if let Some(slot) = parent
                .progress
                .pending_children
                .iter_mut()
                .find(|id| **id == old)
            {
                *slot = new;
                self.save(&mut parent).await?;
            }
            Ok::<(), EngineError>(())
        }
        .await;
        self.unlock(parent_id, guard);
        result
    }

    /// Top-level node executions other than `except` that have not concluded.
    pub(crate) async fn top_level_live(
        &self,
        plan_execution_id: PlanExecutionId,
        except: Option<NodeExecutionId>,
    ) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self
            .node_executions
            .by_plan_execution(plan_execution_id)
            .await?
            .into_iter()
            .filter(|ne| ne.parent_id.is_none() && !ne.is_terminal() && Some(ne.uuid) != except)
            .collect())
    }

    pub(crate) async fn live_children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self
            .node_executions
            .children(parent_id)
            .await?
            .into_iter()
            .filter(|child| !child.is_terminal())
            .collect())
    }

    async fn maybe_finish_plan(&self, ne: &NodeExecution) -> Result<(), EngineError> {
        let plan_execution_id = ne.plan_execution_id();
        if !self
            .top_level_live(plan_execution_id, Some(ne.uuid))
            .await?
            .is_empty()
        {
            return Ok(());
        }
        self.finish_plan(plan_execution_id, ne.status).await
    }

    /// Concludes the plan execution, deriving its status from the last node.
    pub(crate) async fn finish_plan(
        &self,
        plan_execution_id: PlanExecutionId,
        last_status: Status,
    ) -> Result<(), EngineError> {
        let guard = self.plan_locks.lock(plan_execution_id).await;
        let result = async {
            let mut plan_execution = self.load_plan_execution(plan_execution_id).await?;
            if plan_execution.status.is_terminal() {
                return Ok(None);
            }
            let status = match (plan_execution.status, last_status) {
                (Status::Discontinuing, _) => Status::Aborted,
                (_, Status::Skipped) => Status::Succeeded,
                (_, status) => status,
            };
            plan_execution.transition_to(status)?;
            self.save_plan_execution(&mut plan_execution).await?;
            Ok::<_, EngineError>(Some(plan_execution))
        }
        .await;
        drop(guard);
        self.plan_locks.release_idle(&plan_execution_id);

        if let Some(plan_execution) = result? {
            self.plan_finished(&plan_execution).await;
        }
        Ok(())
    }

    async fn plan_finished(&self, plan_execution: &PlanExecution) {
        if let Err(err) = self
            .constraints
            .release_for_entity(&plan_execution.uuid.to_string())
            .await
        {
            tracing::warn!(plan_execution_id = %plan_execution.uuid, error = %err, "could not release plan constraints");
        }
        self.metrics.counter(names::PLAN_EXECUTIONS_ENDED).inc();
        let ambiance = Ambiance::new(plan_execution.uuid, plan_execution.plan_id)
            .with_setup_abstractions(plan_execution.setup_abstractions.clone());
        self.hub.publish_once(
            stratus_telemetry::OrchestrationEvent::new(OrchestrationEventType::OrchestrationEnd, ambiance)
                .with_status(plan_execution.status),
        );
        tracing::info!(
            plan_execution_id = %plan_execution.uuid,
            status = %plan_execution.status,
            "plan execution concluded"
        );
        self.retire_plan(plan_execution.uuid);
    }

    /// Keeps the last `ended_plan_retention` ended plans and evicts the rest.
    fn retire_plan(&self, plan_execution_id: PlanExecutionId) {
        let evicted: Vec<PlanExecutionId> = {
            let mut ended = self.ended_plans.lock();
            ended.retain(|id| *id != plan_execution_id);
            ended.push_back(plan_execution_id);
            let excess = ended.len().saturating_sub(self.config.ended_plan_retention);
            ended.drain(..excess).collect()
        };
        for id in evicted {
            self.plans.remove(&id);
            self.callbacks.forget_plan(id);
            self.hub.forget_plan(id);
            tracing::debug!(plan_execution_id = %id, "ended plan evicted");
        }
    }

    /// Applies the deferred action of `ne` once it is no longer paused.
    pub(crate) async fn settle_locked(self: &Arc<Self>, ne: &mut NodeExecution) -> Result<(), EngineError> {
        if ne.is_terminal() || ne.status == Status::Paused {
            return Ok(());
        }
        if ne.status == Status::ChildWaiting && !ne.progress.queued_children.is_empty() {
            let starts = self.admit_queued_children(ne);
            if !starts.is_empty() {
                self.save(ne).await?;
                for start in starts {
                    self.spawn_start(start);
                }
            }
        }

        let Some(deferred) = ne.progress.deferred.take() else {
            return Ok(());
        };
        if ne.status == Status::Discontinuing && !matches!(deferred, DeferredAction::Conclude { .. }) {
            return self.save(ne).await;
        }
        match deferred {
            DeferredAction::Dispatch => {
                if ne.status != Status::Running {
                    ne.transition_to(Status::Running)?;
                }
                self.save(ne).await?;
                self.dispatch_locked(ne).await
            }
            DeferredAction::Continue => {
                self.save(ne).await?;
                self.continue_locked(ne).await
            }
            DeferredAction::Respond { response } => self.process_step_response_locked(ne, response).await,
            DeferredAction::Conclude {
                status,
                next_node_id,
            } => self.conclude_locked(ne, status, next_node_id).await,
        }
    }

    /// Stores one callback response and continues once all are in.
    pub(crate) async fn callback_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        correlation_id: String,
        response: Value,
    ) -> Result<(), EngineError> {
        if ne.is_terminal() {
            tracing::debug!(node_execution_id = %ne.uuid, correlation_id, "late callback ignored");
            return Ok(());
        }
        if !ne.progress.callback_ids.contains(&correlation_id)
            || ne.progress.responses.contains_key(&correlation_id)
        {
            tracing::debug!(node_execution_id = %ne.uuid, correlation_id, "unexpected callback ignored");
            return Ok(());
        }
        ne.progress.responses.insert(correlation_id, response);
        if !ne.progress.callbacks_complete() {
            return self.save(ne).await;
        }
        match ne.status {
            Status::Paused => {
                ne.progress.deferred = Some(DeferredAction::Continue);
                self.save(ne).await
            }
            Status::Discontinuing => self.save(ne).await,
            _ => {
                self.save(ne).await?;
                self.continue_locked(ne).await
            }
        }
    }
}
