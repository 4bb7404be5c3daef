use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use stratus_core::ResourceRestraintId;
use stratus_execution::{AcquireMode, FailureInfo, FailureType, HoldingScope, StepResponse};
use stratus_step::{AsyncExecutable, AsyncExecutableResponse, StepContext, StepError};

use super::{AcquireRequest, ResourceConstraintEngine};
use crate::error::EngineError;

/// Step type of the built-in resource restraint step.
pub const RESOURCE_RESTRAINT: &str = "RESOURCE_RESTRAINT";

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RestraintParameters {
    resource_restraint_id: ResourceRestraintId,
    resource_unit: String,
    #[serde(default = "one")]
    permits: u32,
    #[serde(default)]
    acquire_mode: AcquireMode,
    #[serde(default)]
    holding_scope: HoldingScope,
    #[serde(default)]
    priority: i32,
}

/// ASYNC step that waits until a resource unit admits it.
///
/// Parameters:
///
/// ```json
/// {
///   "resource_restraint_id": "…",
///   "resource_unit": "prod-cluster",
///   "permits": 1,
///   "acquire_mode": "ENSURE",
///   "holding_scope": "PLAN",
///   "priority": 0
/// }
/// ```
///
/// The holding scope picks the entity whose end releases the permits: the
/// plan execution, the enclosing STAGE node, or the parent node.
pub struct ResourceRestraintStep {
    constraints: Arc<ResourceConstraintEngine>,
}

impl ResourceRestraintStep {
    /// A step acquiring through `constraints`.
    pub fn new(constraints: Arc<ResourceConstraintEngine>) -> Self {
        Self { constraints }
    }
}

impl std::fmt::Debug for ResourceRestraintStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRestraintStep").finish_non_exhaustive()
    }
}

fn release_entity(ctx: &StepContext, scope: HoldingScope) -> String {
    let plan_execution = ctx.ambiance.plan_execution_id().to_string();
    match scope {
        HoldingScope::Plan => plan_execution,
        HoldingScope::Stage => ctx
            .ambiance
            .stage_level()
            .map_or(plan_execution, |level| level.runtime_id.to_string()),
        HoldingScope::Parent => ctx
            .ambiance
            .parent_runtime_id()
            .map_or(plan_execution, |id| id.to_string()),
    }
}

fn step_error(err: EngineError) -> StepError {
    match err {
        EngineError::ResourceUnavailable { .. } | EngineError::RestraintNotFound { .. } => {
            StepError::failure(
                FailureInfo::new(err.to_string()).with_type(FailureType::ResourceUnavailable),
            )
        }
        other => StepError::Internal(other.to_string()),
    }
}

#[async_trait]
impl AsyncExecutable for ResourceRestraintStep {
    async fn execute_async(&self, ctx: &StepContext) -> Result<AsyncExecutableResponse, StepError> {
        let params: RestraintParameters = ctx.parameters()?;
        let request = AcquireRequest {
            restraint_id: params.resource_restraint_id,
            resource_unit: params.resource_unit,
            permits: params.permits,
            mode: params.acquire_mode,
            priority: params.priority,
            release_entity_id: release_entity(ctx, params.holding_scope),
            plan_execution_id: ctx.ambiance.plan_execution_id(),
            node_execution_id: ctx.node_execution_id,
        };
        let instance = self.constraints.acquire(request).await.map_err(step_error)?;
        Ok(AsyncExecutableResponse::new([instance.uuid.to_string()]))
    }

    async fn handle_async_response(
        &self,
        _ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<StepResponse, StepError> {
        let mut response = StepResponse::succeeded();
        if let Some(instance_id) = responses.keys().next() {
            response = response.with_outcome("resource_constraint_instance_id", json!(instance_id));
        }
        Ok(response)
    }

    async fn handle_abort(&self, ctx: &StepContext) -> Result<(), StepError> {
        self.constraints
            .abandon_blocked(ctx.node_execution_id)
            .await
            .map_err(step_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stratus_core::{
        Ambiance, Level, NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId, StepCategory, StepType,
    };
    use stratus_execution::{ConstraintState, ResourceRestraint};
    use stratus_storage_memory::MemoryConstraintRepo;
    use tokio::sync::mpsc;

    fn context(ambiance: Ambiance, params: Value) -> StepContext {
        StepContext::new(ambiance, NodeExecutionId::new(), PlanNodeId::new(), params)
    }

    fn level(category: StepCategory) -> Level {
        Level::new(
            NodeExecutionId::new(),
            PlanNodeId::new(),
            "node",
            StepType::new("NODE", category),
        )
    }

    #[test]
    fn holding_scope_picks_release_entity() {
        let stage = level(StepCategory::Stage);
        let parent = level(StepCategory::StepGroup);
        let ambiance = Ambiance::new(PlanExecutionId::new(), PlanId::new())
            .clone_for_child(stage.clone())
            .clone_for_child(parent.clone())
            .clone_for_child(level(StepCategory::Step));
        let ctx = context(ambiance.clone(), Value::Null);

        assert_eq!(
            release_entity(&ctx, HoldingScope::Plan),
            ambiance.plan_execution_id().to_string()
        );
        assert_eq!(release_entity(&ctx, HoldingScope::Stage), stage.runtime_id.to_string());
        assert_eq!(release_entity(&ctx, HoldingScope::Parent), parent.runtime_id.to_string());
    }

    #[test]
    fn missing_stage_falls_back_to_plan() {
        let ambiance = Ambiance::new(PlanExecutionId::new(), PlanId::new())
            .clone_for_child(level(StepCategory::Step));
        let ctx = context(ambiance.clone(), Value::Null);
        assert_eq!(
            release_entity(&ctx, HoldingScope::Stage),
            ambiance.plan_execution_id().to_string()
        );
    }

    #[tokio::test]
    async fn acquires_and_reports_the_instance() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let constraints = Arc::new(ResourceConstraintEngine::new(
            Arc::new(MemoryConstraintRepo::new()),
            tx,
        ));
        let restraint = ResourceRestraint::new("deploys", 1);
        constraints.register_restraint(restraint.clone()).await.unwrap();
        let step = ResourceRestraintStep::new(Arc::clone(&constraints));

        let ambiance = Ambiance::new(PlanExecutionId::new(), PlanId::new());
        let ctx = context(
            ambiance,
            json!({"resource_restraint_id": restraint.uuid, "resource_unit": "prod"}),
        );
        let started = step.execute_async(&ctx).await.unwrap();
        assert_eq!(started.callback_ids.len(), 1);

        let instance_id = started.callback_ids[0].clone();
        let responses = BTreeMap::from([(instance_id.clone(), json!({"state": "ACTIVE"}))]);
        let response = step.handle_async_response(&ctx, &responses).await.unwrap();
        assert_eq!(
            response.outcomes.get("resource_constraint_instance_id"),
            Some(&json!(instance_id))
        );

        let busy = context(
            Ambiance::new(PlanExecutionId::new(), PlanId::new()),
            json!({
                "resource_restraint_id": restraint.uuid,
                "resource_unit": "prod",
                "acquire_mode": "TRY_ONCE",
            }),
        );
        let err = step.execute_async(&busy).await.unwrap_err();
        assert!(
            err.into_failure_info()
                .failure_types
                .contains(&FailureType::ResourceUnavailable)
        );

        let waiting = context(
            Ambiance::new(PlanExecutionId::new(), PlanId::new()),
            json!({"resource_restraint_id": restraint.uuid, "resource_unit": "prod"}),
        );
        let queued = step.execute_async(&waiting).await.unwrap();
        step.handle_abort(&waiting).await.unwrap();
        let id = stratus_core::ResourceConstraintInstanceId::parse(&queued.callback_ids[0]).unwrap();
        let abandoned = constraints.instance(id).await.unwrap().unwrap();
        assert_eq!(abandoned.state, ConstraintState::Finished);
    }
}
