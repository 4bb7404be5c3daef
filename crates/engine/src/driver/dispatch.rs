//! Mode-specific step invocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use stratus_core::{NodeExecutionId, PlanNodeId, Status};
use stratus_execution::{FailureInfo, FailureType, NodeExecution, StepResponse};
use stratus_step::{
    ChildChainExecutable, ChildChainResponse, Executable, StepContext, TaskChainExecutable,
    TaskChainResponse, TaskRequest,
};

use super::{EngineInner, NodeStart, failed_response, node_of};
use crate::error::EngineError;

impl EngineInner {
    /// Resolves the step context and the registered step of `ne`.
    async fn prepare(&self, ne: &NodeExecution) -> Result<(StepContext, Executable), EngineError> {
        let plan = self.plan(ne.plan_execution_id())?;
        let node = node_of(&plan, ne.node_id)?;
        let mode = ne.mode.ok_or_else(|| {
            EngineError::invalid_parameters(
                node.facilitator_obtainment.facilitator_type.to_string(),
                "node execution has no execution mode",
            )
        })?;
        let executable = self.executable(node, mode)?;
        let ctx = self.step_context(ne, node).await?;
        Ok((ctx, executable))
    }

    /// Hands a RUNNING node to its step.
    pub(crate) async fn dispatch_locked(self: &Arc<Self>, ne: &mut NodeExecution) -> Result<(), EngineError> {
        let (ctx, executable) = self.prepare(ne).await?;
        tracing::debug!(node_execution_id = %ne.uuid, mode = %executable.mode(), "dispatching step");

        let response = match executable {
            Executable::Sync(step) => step.execute_sync(&ctx).await,
            Executable::Async(step) => match step.execute_async(&ctx).await {
                Ok(started) if started.callback_ids.is_empty() => {
                    step.handle_async_response(&ctx, &BTreeMap::new()).await
                }
                Ok(started) => return self.await_callbacks_locked(ne, started.callback_ids).await,
                Err(err) => Err(err),
            },
            Executable::Task(step) => match step.obtain_task(&ctx).await {
                Ok(request) => return self.queue_and_await_locked(ne, &request).await,
                Err(err) => Err(err),
            },
            Executable::TaskChain(step) => match step.start_chain_link(&ctx).await {
                Ok(link) => return self.task_link_locked(ne, &ctx, step.as_ref(), link).await,
                Err(err) => Err(err),
            },
            Executable::Child(step) => match step.obtain_child(&ctx).await {
                Ok(child) => {
                    return self
                        .start_children_locked(ne, vec![child.child_node_id], None)
                        .await;
                }
                Err(err) => Err(err),
            },
            Executable::Children(step) => match step.obtain_children(&ctx).await {
                Ok(children) if children.children.is_empty() => {
                    step.handle_children_response(&ctx, &[]).await
                }
                Ok(children) => {
                    return self
                        .start_children_locked(ne, children.children, children.max_concurrency)
                        .await;
                }
                Err(err) => Err(err),
            },
            Executable::ChildChain(step) => match step.execute_first_child(&ctx).await {
                Ok(link) => return self.child_link_locked(ne, &ctx, step.as_ref(), link).await,
                Err(err) => Err(err),
            },
        };
        self.process_step_response_locked(ne, response.unwrap_or_else(failed_response))
            .await
    }

    /// Resumes a node whose callbacks or children are all in.
    pub(crate) fn continue_locked<'a>(
        self: &'a Arc<Self>,
        ne: &'a mut NodeExecution,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(self.continue_inner(ne))
    }

    async fn continue_inner(self: &Arc<Self>, ne: &mut NodeExecution) -> Result<(), EngineError> {
        let (ctx, executable) = self.prepare(ne).await?;
        let first_result = ne
            .progress
            .responses
            .values()
            .next()
            .cloned()
            .unwrap_or(Value::Null);
        let pass_through = ne.progress.pass_through.clone().unwrap_or(Value::Null);

        let response = match executable {
            Executable::Sync(_) => return Ok(()),
            Executable::Async(step) => {
                step.handle_async_response(&ctx, &ne.progress.responses)
                    .await
            }
            Executable::Task(step) => step.handle_task_result(&ctx, &first_result).await,
            Executable::TaskChain(step) if ne.progress.chain_end => {
                step.finalize_execution(&ctx, &pass_through, &first_result)
                    .await
            }
            Executable::TaskChain(step) => {
                match step
                    .execute_next_link(&ctx, &pass_through, &first_result)
                    .await
                {
                    Ok(link) => return self.task_link_locked(ne, &ctx, step.as_ref(), link).await,
                    Err(err) => Err(err),
                }
            }
            Executable::Child(step) => {
                step.handle_child_response(&ctx, &ne.progress.child_outcomes)
                    .await
            }
            Executable::Children(step) => {
                step.handle_children_response(&ctx, &ne.progress.child_outcomes)
                    .await
            }
            Executable::ChildChain(step) => match ne.progress.child_outcomes.last().cloned() {
                Some(last) if !ne.progress.chain_end => {
                    match step.execute_next_child(&ctx, &pass_through, &last).await {
                        Ok(link) => {
                            return self.child_link_locked(ne, &ctx, step.as_ref(), link).await;
                        }
                        Err(err) => Err(err),
                    }
                }
                _ => {
                    step.finalize_execution(&ctx, &pass_through, &ne.progress.child_outcomes)
                        .await
                }
            },
        };
        self.process_step_response_locked(ne, response.unwrap_or_else(failed_response))
            .await
    }

    async fn task_link_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        ctx: &StepContext,
        step: &dyn TaskChainExecutable,
        link: TaskChainResponse,
    ) -> Result<(), EngineError> {
        ne.progress.pass_through = Some(link.pass_through);
        ne.progress.chain_end = link.chain_end;
        match link.task_request {
            Some(request) => self.queue_and_await_locked(ne, &request).await,
            None => {
                let pass_through = ne.progress.pass_through.clone().unwrap_or(Value::Null);
                let response = step
                    .finalize_execution(ctx, &pass_through, &Value::Null)
                    .await
                    .unwrap_or_else(failed_response);
                self.process_step_response_locked(ne, response).await
            }
        }
    }

    async fn child_link_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        ctx: &StepContext,
        step: &dyn ChildChainExecutable,
        link: ChildChainResponse,
    ) -> Result<(), EngineError> {
        ne.progress.pass_through = Some(link.pass_through);
        ne.progress.chain_end = link.last_link;
        match link.next_child_id {
            Some(child_id) => self.start_children_locked(ne, vec![child_id], None).await,
            None => {
                let pass_through = ne.progress.pass_through.clone().unwrap_or(Value::Null);
                let response = step
                    .finalize_execution(ctx, &pass_through, &ne.progress.child_outcomes)
                    .await
                    .unwrap_or_else(failed_response);
                self.process_step_response_locked(ne, response).await
            }
        }
    }

    async fn queue_and_await_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        request: &TaskRequest,
    ) -> Result<(), EngineError> {
        match self.queue_task(ne.uuid, request).await? {
            Ok(task_id) => self.await_callbacks_locked(ne, vec![task_id]).await,
            Err(response) => self.process_step_response_locked(ne, response).await,
        }
    }

    /// Queues a task. A dispatcher failure fails the step, not the engine.
    async fn queue_task(
        &self,
        node_execution_id: NodeExecutionId,
        request: &TaskRequest,
    ) -> Result<Result<String, StepResponse>, EngineError> {
        let dispatcher = self
            .task_dispatcher
            .as_ref()
            .ok_or(EngineError::MissingTaskDispatcher)?;
        match dispatcher.queue_task(node_execution_id, request).await {
            Ok(task_id) => {
                tracing::debug!(%node_execution_id, task_id, task_type = %request.task_type, "task queued");
                Ok(Ok(task_id))
            }
            Err(err) => {
                tracing::warn!(%node_execution_id, error = %err, "task could not be queued");
                Ok(Err(StepResponse::failed(
                    FailureInfo::new(format!("could not queue task: {err}"))
                        .with_type(FailureType::Connectivity),
                )))
            }
        }
    }

    /// Parks `ne` until every id in `callback_ids` has a response.
    async fn await_callbacks_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        callback_ids: Vec<String>,
    ) -> Result<(), EngineError> {
        ne.progress.reset_callbacks();
        if let Some(mode) = ne.mode {
            let waiting = mode.waiting_status();
            if ne.status != waiting {
                ne.transition_to(waiting)?;
            }
        }
        for callback_id in &callback_ids {
            if let Some(early) = self
                .callbacks
                .register(ne.plan_execution_id(), callback_id, ne.uuid)
            {
                ne.progress.responses.insert(callback_id.clone(), early);
            }
        }
        ne.progress.callback_ids = callback_ids;
        self.save(ne).await?;
        if ne.progress.callbacks_complete() {
            self.continue_locked(ne).await
        } else {
            Ok(())
        }
    }

    /// Queues `children` and starts as many as the concurrency limit allows.
    pub(crate) async fn start_children_locked(
        self: &Arc<Self>,
        ne: &mut NodeExecution,
        children: Vec<PlanNodeId>,
        max_concurrency: Option<usize>,
    ) -> Result<(), EngineError> {
        let plan = self.plan(ne.plan_execution_id())?;
        if let Some(missing) = children.iter().find(|id| !plan.contains(**id)) {
            return Err(EngineError::invalid_parameters(
                ne.identifier.clone(),
                format!("child node {missing} is not part of the plan"),
            ));
        }
        ne.progress.queued_children.extend(children);
        ne.progress.max_concurrency = max_concurrency.filter(|limit| *limit > 0);
        let starts = self.admit_queued_children(ne);
        if ne.status != Status::ChildWaiting {
            ne.transition_to(Status::ChildWaiting)?;
        }
        self.save(ne).await?;
        for start in starts {
            self.spawn_start(start);
        }
        Ok(())
    }

    /// Moves queued children to pending while the limit allows.
    ///
    /// The caller saves `ne` before spawning the returned starts.
    pub(crate) fn admit_queued_children(&self, ne: &mut NodeExecution) -> Vec<NodeStart> {
        let limit = ne.progress.max_concurrency.unwrap_or(usize::MAX);
        let mut starts = Vec::new();
        while ne.progress.pending_children.len() < limit {
            let Some(node_id) = ne.progress.queued_children.pop_front() else {
                break;
            };
            let start = NodeStart::child(ne, node_id);
            ne.progress.pending_children.push(start.uuid);
            starts.push(start);
        }
        starts
    }

    /// Best-effort cancellation of the external work of `ne`.
    pub(crate) async fn abort_external_locked(&self, ne: &NodeExecution) {
        let Ok((ctx, executable)) = self.prepare(ne).await else {
            return;
        };
        match executable {
            Executable::Async(step) => {
                if let Err(err) = step.handle_abort(&ctx).await {
                    tracing::warn!(node_execution_id = %ne.uuid, error = %err, "step abort failed");
                }
            }
            Executable::Task(_) | Executable::TaskChain(_) => {
                let Some(dispatcher) = &self.task_dispatcher else {
                    return;
                };
                let outstanding = ne
                    .progress
                    .callback_ids
                    .iter()
                    .filter(|id| !ne.progress.responses.contains_key(*id));
                for task_id in outstanding {
                    if let Err(err) = dispatcher.abort_task(task_id).await {
                        tracing::warn!(node_execution_id = %ne.uuid, task_id, error = %err, "task abort failed");
                    }
                }
            }
            _ => {}
        }
    }
}
