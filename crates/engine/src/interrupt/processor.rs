use std::sync::Arc;

use futures::future::BoxFuture;
use stratus_core::{InterruptId, NodeExecutionId, PlanExecutionId, Status};
use stratus_execution::{
    CustomFailure, Interrupt, InterruptState, InterruptType, StepResponse,
};
use stratus_telemetry::metrics::names;

use super::{InterruptRequest, StatusPropagator};
use crate::driver::{EngineInner, NodeStart};
use crate::error::EngineError;

/// Statuses an ABORT moves to DISCONTINUING.
const LIVE: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::ChildWaiting,
    Status::InterventionWaiting,
    Status::Paused,
    Status::Resumed,
];

impl EngineInner {
    /// Validates and stores an interrupt. Duplicates return the stored one.
    pub(crate) async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, EngineError> {
        request.validate()?;
        self.load_plan_execution(request.plan_execution_id).await?;
        if let Some(id) = request.node_execution_id {
            let ne = self.load(id).await?;
            if ne.plan_execution_id() != request.plan_execution_id {
                return Err(EngineError::invalid_interrupt(
                    request.interrupt_type,
                    "node execution belongs to another plan execution",
                ));
            }
        }

        let (interrupt, created) = self
            .interrupts
            .register_if_absent(request.into_interrupt())
            .await?;
        if created {
            tracing::info!(
                interrupt_id = %interrupt.uuid,
                interrupt_type = %interrupt.interrupt_type,
                plan_execution_id = %interrupt.plan_execution_id,
                "interrupt registered"
            );
        } else {
            tracing::debug!(
                interrupt_id = %interrupt.uuid,
                interrupt_type = %interrupt.interrupt_type,
                "equivalent interrupt already pending"
            );
        }
        Ok(interrupt)
    }

    /// Claims and applies a registered interrupt.
    ///
    /// Failures to apply are recorded on the interrupt, not returned.
    pub(crate) fn process_interrupt(
        self: &Arc<Self>,
        id: InterruptId,
    ) -> BoxFuture<'_, Result<InterruptState, EngineError>> {
        Box::pin(async move {
            let interrupt = self
                .interrupts
                .get(id)
                .await?
                .ok_or(EngineError::InterruptNotFound { id })?;
            if !self
                .interrupts
                .transition(id, InterruptState::Registered, InterruptState::Processing, None)
                .await?
            {
                let state = self
                    .interrupts
                    .get(id)
                    .await?
                    .map_or(interrupt.state, |current| current.state);
                tracing::debug!(interrupt_id = %id, ?state, "interrupt already claimed");
                return Ok(state);
            }

            match self.apply_interrupt(&interrupt).await {
                Ok(()) => {
                    self.interrupts
                        .transition(
                            id,
                            InterruptState::Processing,
                            InterruptState::ProcessedSuccessfully,
                            None,
                        )
                        .await?;
                    self.metrics.counter(names::INTERRUPTS_PROCESSED).inc();
                    tracing::info!(
                        interrupt_id = %id,
                        interrupt_type = %interrupt.interrupt_type,
                        "interrupt processed"
                    );
                    Ok(InterruptState::ProcessedSuccessfully)
                }
                Err(err) => {
                    self.interrupts
                        .transition(
                            id,
                            InterruptState::Processing,
                            InterruptState::ProcessedUnsuccessfully,
                            Some(err.to_string()),
                        )
                        .await?;
                    self.metrics.counter(names::INTERRUPTS_FAILED).inc();
                    tracing::warn!(
                        interrupt_id = %id,
                        interrupt_type = %interrupt.interrupt_type,
                        error = %err,
                        "interrupt could not be applied"
                    );
                    Ok(InterruptState::ProcessedUnsuccessfully)
                }
            }
        })
    }

    async fn apply_interrupt(self: &Arc<Self>, interrupt: &Interrupt) -> Result<(), EngineError> {
        let interrupt_type = interrupt.interrupt_type;
        let plan_execution_id = interrupt.plan_execution_id;
        let Some(id) = interrupt.node_execution_id else {
            return match interrupt_type {
                InterruptType::Abort => self.abort_plan(plan_execution_id).await,
                InterruptType::Pause => self.pause_plan(plan_execution_id).await,
                InterruptType::Resume => self.resume_plan(plan_execution_id).await,
                other => Err(EngineError::invalid_interrupt(
                    other,
                    "a node execution id is required",
                )),
            };
        };

        match interrupt_type {
            InterruptType::Abort => {
                if self.abort_node(id).await? {
                    Ok(())
                } else {
                    Err(EngineError::illegal_interrupt(
                        interrupt_type,
                        "node execution already concluded",
                    ))
                }
            }
            InterruptType::Pause | InterruptType::Resume => {
                let ne = self.load(id).await?;
                match StatusPropagator::select(interrupt_type, ne.status) {
                    StatusPropagator::Pause => self.pause_node(id).await,
                    StatusPropagator::Resume => self.resume_node(id).await,
                    StatusPropagator::Noop => Err(EngineError::illegal_interrupt(
                        interrupt_type,
                        format!("node execution is {}", ne.status),
                    )),
                }
            }
            InterruptType::Retry => self.retry_node(id).await,
            InterruptType::CustomFailure => {
                let custom_failure = interrupt.custom_failure.clone().ok_or_else(|| {
                    EngineError::invalid_interrupt(interrupt_type, "custom failure details are required")
                })?;
                self.custom_failure(id, custom_failure).await
            }
            InterruptType::MarkFailed | InterruptType::Ignore => {
                self.intervention(id, interrupt_type).await
            }
        }
    }

    async fn abort_plan(self: &Arc<Self>, plan_execution_id: PlanExecutionId) -> Result<(), EngineError> {
        self.update_plan_status(plan_execution_id, InterruptType::Abort, |status| {
            if status == Status::Discontinuing {
                Ok(None)
            } else {
                Ok(Some(Status::Discontinuing))
            }
        })
        .await?;
        for ne in self.top_level_live(plan_execution_id, None).await? {
            self.abort_node(ne.uuid).await?;
        }
        self.finish_plan(plan_execution_id, Status::Aborted).await
    }

    async fn pause_plan(self: &Arc<Self>, plan_execution_id: PlanExecutionId) -> Result<(), EngineError> {
        self.update_plan_status(plan_execution_id, InterruptType::Pause, |status| {
            if status == Status::Running {
                Ok(Some(Status::Paused))
            } else {
                Err(format!("plan execution is {status}"))
            }
        })
        .await?;
        for ne in self.top_level_live(plan_execution_id, None).await? {
            if ne.status.is_pausable() {
                self.pause_node(ne.uuid).await?;
            }
        }
        Ok(())
    }

    async fn resume_plan(self: &Arc<Self>, plan_execution_id: PlanExecutionId) -> Result<(), EngineError> {
        self.update_plan_status(plan_execution_id, InterruptType::Resume, |status| {
            if status == Status::Paused {
                Ok(Some(Status::Running))
            } else {
                Err(format!("plan execution is {status}"))
            }
        })
        .await?;
        for ne in self.top_level_live(plan_execution_id, None).await? {
            if ne.status == Status::Paused {
                self.resume_node(ne.uuid).await?;
            }
        }
        Ok(())
    }

    /// Moves the plan execution to the status `decide` picks under the plan lock.
    ///
    /// `decide` returns `Ok(None)` to leave the status alone and `Err` to
    /// reject the interrupt. Terminal plan executions are always rejected.
    async fn update_plan_status(
        &self,
        plan_execution_id: PlanExecutionId,
        interrupt_type: InterruptType,
        decide: impl FnOnce(Status) -> Result<Option<Status>, String> + Send,
    ) -> Result<(), EngineError> {
        let guard = self.plan_locks.lock(plan_execution_id).await;
        let result = async {
            let mut plan_execution = self.load_plan_execution(plan_execution_id).await?;
            if plan_execution.status.is_terminal() {
                return Err(EngineError::illegal_interrupt(
                    interrupt_type,
                    "plan execution already concluded",
                ));
            }
            let to = decide(plan_execution.status)
                .map_err(|reason| EngineError::illegal_interrupt(interrupt_type, reason))?;
            if let Some(to) = to {
                plan_execution.transition_to(to)?;
                self.save_plan_execution(&mut plan_execution).await?;
                tracing::info!(%plan_execution_id, status = %to, "plan execution status changed");
            }
            Ok(())
        }
        .await;
        drop(guard);
        self.plan_locks.release_idle(&plan_execution_id);
        result
    }

    /// Aborts a node and its descendants.
    ///
    /// Returns `false` when the node had already concluded.
    pub(crate) fn abort_node(self: &Arc<Self>, id: NodeExecutionId) -> BoxFuture<'_, Result<bool, EngineError>> {
        Box::pin(async move {
            let guard = self.lock_node(id).await;
            let marked = async {
                let ne = match self
                    .node_executions
                    .update_status_if(id, LIVE, Status::Discontinuing)
                    .await?
                {
                    Some(ne) => ne,
                    None => {
                        let ne = self.load(id).await?;
                        if ne.is_terminal() {
                            return Ok(false);
                        }
                        ne
                    }
                };
                self.timeouts.cancel(&ne.timeout_instance_ids);
                Ok::<_, EngineError>(true)
            }
            .await;
            self.unlock(id, guard);
            if !marked? {
                return Ok(false);
            }

            for child in self.live_children(id).await? {
                self.abort_node(child.uuid).await?;
            }

            let guard = self.lock_node(id).await;
            let result = async {
                let mut ne = self.load(id).await?;
                if ne.is_terminal() {
                    return Ok(());
                }
                self.abort_external_locked(&ne).await;
                ne.step_response = Some(StepResponse::new(Status::Aborted));
                self.conclude_locked(&mut ne, Status::Aborted, None).await
            }
            .await;
            self.unlock(id, guard);
            tracing::info!(node_execution_id = %id, "node execution aborted");
            result.map(|()| true)
        })
    }

    fn pause_node(self: &Arc<Self>, id: NodeExecutionId) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let guard = self.lock_node(id).await;
            let result = async {
                let mut ne = self.load(id).await?;
                if !ne.status.is_pausable() {
                    return Ok(false);
                }
                ne.paused_from = Some(if ne.status == Status::Queued {
                    Status::Running
                } else {
                    ne.status
                });
                ne.transition_to(Status::Paused)?;
                self.timeouts.pause(&ne.timeout_instance_ids);
                self.save(&mut ne).await?;
                Ok::<_, EngineError>(true)
            }
            .await;
            self.unlock(id, guard);
            if result? {
                tracing::info!(node_execution_id = %id, "node execution paused");
            }

            for child in self.live_children(id).await? {
                if child.status.is_pausable() {
                    self.pause_node(child.uuid).await?;
                }
            }
            Ok(())
        })
    }

    fn resume_node(self: &Arc<Self>, id: NodeExecutionId) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let guard = self.lock_node(id).await;
            let result = async {
                let mut ne = self.load(id).await?;
                if ne.status != Status::Paused {
                    return Ok(false);
                }
                ne.transition_to(Status::Resumed)?;
                let restored = ne.paused_from.take().unwrap_or(Status::Running);
                if restored != Status::Resumed {
                    ne.transition_to(restored)?;
                }
                self.timeouts.resume(&ne.timeout_instance_ids);
                self.save(&mut ne).await?;
                Ok::<_, EngineError>(true)
            }
            .await;
            self.unlock(id, guard);
            let resumed = result?;

            for child in self.live_children(id).await? {
                if child.status == Status::Paused {
                    self.resume_node(child.uuid).await?;
                }
            }
            if resumed {
                tracing::info!(node_execution_id = %id, "node execution resumed");
                self.settle(id).await?;
            }
            Ok(())
        })
    }

    async fn retry_node(self: &Arc<Self>, id: NodeExecutionId) -> Result<(), EngineError> {
        let guard = self.lock_node(id).await;
        let result = async {
            let mut ne = self.load(id).await?;
            if ne.status != Status::Failed || ne.old_retry {
                return Err(EngineError::illegal_interrupt(
                    InterruptType::Retry,
                    if ne.old_retry {
                        "node execution was already retried".to_owned()
                    } else {
                        format!("node execution is {}", ne.status)
                    },
                ));
            }
            // An evicted plan can no longer start nodes.
            self.plan(ne.plan_execution_id())?;
            let start = NodeStart::retry(&ne);
            match ne.parent_id {
                None => self.reopen_plan(ne.plan_execution_id()).await?,
                Some(parent_id) => self.reattach_child(parent_id, ne.uuid, start.uuid).await?,
            }
            ne.old_retry = true;
            self.save(&mut ne).await?;
            Ok(start)
        }
        .await;
        self.unlock(id, guard);
        let start = result?;
        tracing::info!(node_execution_id = %id, retry_node_execution_id = %start.uuid, "manual retry");
        self.spawn_start(start);
        Ok(())
    }

    async fn reopen_plan(&self, plan_execution_id: PlanExecutionId) -> Result<(), EngineError> {
        let guard = self.plan_locks.lock(plan_execution_id).await;
        let result = async {
            let mut plan_execution = self.load_plan_execution(plan_execution_id).await?;
            if plan_execution.status == Status::Discontinuing {
                return Err(EngineError::illegal_interrupt(
                    InterruptType::Retry,
                    "plan execution is being aborted",
                ));
            }
            if plan_execution.status.is_terminal() {
                plan_execution.reopen()?;
                self.save_plan_execution(&mut plan_execution).await?;
                self.ended_plans.lock().retain(|id| *id != plan_execution_id);
                tracing::info!(%plan_execution_id, "plan execution reopened");
            }
            Ok(())
        }
        .await;
        drop(guard);
        self.plan_locks.release_idle(&plan_execution_id);
        result
    }

    async fn reattach_child(
        &self,
        parent_id: NodeExecutionId,
        old: NodeExecutionId,
        new: NodeExecutionId,
    ) -> Result<(), EngineError> {
        let guard = self.lock_node(parent_id).await;
        let result = async {
            let mut parent = self.load(parent_id).await?;
            if parent.is_terminal() || parent.status == Status::Discontinuing {
                return Err(EngineError::illegal_interrupt(
                    InterruptType::Retry,
                    format!("parent node execution is {}", parent.status),
                ));
            }
            parent
                .progress
                .child_outcomes
                .retain(|outcome| outcome.node_execution_id != old);
            match parent
                .progress
                .pending_children
                .iter_mut()
                .find(|id| **id == old)
            {
                Some(slot) => *slot = new,
                None => parent.progress.pending_children.push(new),
            }
            self.save(&mut parent).await
        }
        .await;
        self.unlock(parent_id, guard);
        result
    }

    async fn custom_failure(self: &Arc<Self>, id: NodeExecutionId, custom_failure: CustomFailure) -> Result<(), EngineError> {
        let guard = self.lock_node(id).await;
        let marked = async {
            let mut ne = self.load(id).await?;
            if ne.is_terminal() || ne.status == Status::Discontinuing {
                return Err(EngineError::illegal_interrupt(
                    InterruptType::CustomFailure,
                    format!("node execution is {}", ne.status),
                ));
            }
            ne.transition_to(Status::Discontinuing)?;
            self.timeouts.cancel(&ne.timeout_instance_ids);
            self.save(&mut ne).await
        }
        .await;
        self.unlock(id, guard);
        marked?;

        for child in self.live_children(id).await? {
            self.abort_node(child.uuid).await?;
        }

        let guard = self.lock_node(id).await;
        let result = async {
            let mut ne = self.load(id).await?;
            if ne.is_terminal() {
                return Ok(());
            }
            self.abort_external_locked(&ne).await;
            let response = StepResponse::new(custom_failure.status)
                .with_failure(custom_failure.failure_info);
            let result = self.process_step_response_locked(&mut ne, response).await;
            self.absorb_fault(&mut ne, result).await
        }
        .await;
        self.unlock(id, guard);
        result
    }

    async fn intervention(self: &Arc<Self>, id: NodeExecutionId, interrupt_type: InterruptType) -> Result<(), EngineError> {
        let guard = self.lock_node(id).await;
        let result = async {
            let mut ne = self.load(id).await?;
            if ne.status != Status::InterventionWaiting {
                return Err(EngineError::illegal_interrupt(
                    interrupt_type,
                    format!("node execution is {}", ne.status),
                ));
            }
            let (status, next) = if interrupt_type == InterruptType::Ignore {
                (Status::Succeeded, ne.progress.intervention_next.take())
            } else {
                let reported = ne
                    .step_response
                    .as_ref()
                    .map(|response| response.status)
                    .filter(Status::is_broke);
                (reported.unwrap_or(Status::Failed), None)
            };
            tracing::info!(node_execution_id = %id, %interrupt_type, %status, "manual intervention");
            self.conclude_locked(&mut ne, status, next).await
        }
        .await;
        self.unlock(id, guard);
        result
    }
}
