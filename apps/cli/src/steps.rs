//! Demo steps available to plans run from the CLI.
//!
//! | step type | mode     | parameters                                        |
//! |-----------|----------|---------------------------------------------------|
//! | `noop`    | SYNC     | none                                              |
//! | `fail`    | SYNC     | `{"message": "...", "failure_types": ["..."]}`    |
//! | `echo`    | SYNC     | `{"outcomes": {...}}`, resolved inputs echoed too |
//! | `fan_out` | CHILDREN | `{"children": [node ids], "max_concurrency": n}`  |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use stratus_core::PlanNodeId;
use stratus_execution::{ChildOutcome, FailureInfo, FailureType, StepResponse, aggregate_child_outcomes};
use stratus_step::{
    ChildrenExecutable, ChildrenExecutableResponse, Executable, StepContext, StepError,
    StepRegistry, SyncExecutable,
};

pub const NOOP: &str = "noop";
pub const FAIL: &str = "fail";
pub const ECHO: &str = "echo";
pub const FAN_OUT: &str = "fan_out";

/// A registry holding every demo step.
pub fn registry() -> StepRegistry {
    let steps = StepRegistry::new();
    steps.register(NOOP, Executable::Sync(Arc::new(Noop)));
    steps.register(FAIL, Executable::Sync(Arc::new(Fail)));
    steps.register(ECHO, Executable::Sync(Arc::new(Echo)));
    steps.register(FAN_OUT, Executable::Children(Arc::new(FanOut)));
    steps
}

struct Noop;

#[async_trait]
impl SyncExecutable for Noop {
    async fn execute_sync(&self, _ctx: &StepContext) -> Result<StepResponse, StepError> {
        Ok(StepResponse::succeeded())
    }
}

fn default_message() -> String {
    "step failed on purpose".to_string()
}

#[derive(Debug, Deserialize)]
struct FailParameters {
    #[serde(default = "default_message")]
    message: String,
    #[serde(default)]
    failure_types: Vec<FailureType>,
}

struct Fail;

#[async_trait]
impl SyncExecutable for Fail {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse, StepError> {
        let params: FailParameters = if ctx.step_parameters.is_null() {
            FailParameters {
                message: default_message(),
                failure_types: Vec::new(),
            }
        } else {
            ctx.parameters()?
        };
        let failure = params
            .failure_types
            .into_iter()
            .fold(FailureInfo::new(params.message), FailureInfo::with_type);
        Err(StepError::failure(failure))
    }
}

#[derive(Debug, Default, Deserialize)]
struct EchoParameters {
    #[serde(default)]
    outcomes: BTreeMap<String, Value>,
}

struct Echo;

#[async_trait]
impl SyncExecutable for Echo {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse, StepError> {
        let params: EchoParameters = if ctx.step_parameters.is_null() {
            EchoParameters::default()
        } else {
            ctx.parameters()?
        };
        let mut response = StepResponse::succeeded();
        for (name, value) in params.outcomes {
            response = response.with_outcome(name, value);
        }
        if !ctx.inputs.is_empty() {
            response = response.with_outcome("inputs", json!(ctx.inputs));
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct FanOutParameters {
    children: Vec<PlanNodeId>,
    #[serde(default)]
    max_concurrency: Option<usize>,
}

struct FanOut;

#[async_trait]
impl ChildrenExecutable for FanOut {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<ChildrenExecutableResponse, StepError> {
        let params: FanOutParameters = ctx.parameters()?;
        Ok(ChildrenExecutableResponse {
            children: params.children,
            max_concurrency: params.max_concurrency,
        })
    }

    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        outcomes: &[ChildOutcome],
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_child_outcomes(outcomes).with_outcome("children", json!(outcomes.len())))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stratus_core::{Ambiance, NodeExecutionId, PlanExecutionId, PlanId, Status};

    use super::*;

    fn context(params: Value) -> StepContext {
        StepContext::new(
            Ambiance::new(PlanExecutionId::new(), PlanId::new()),
            NodeExecutionId::new(),
            PlanNodeId::new(),
            params,
        )
    }

    #[test]
    fn registry_has_every_demo_step() {
        let steps = registry();
        let mut keys = steps.keys();
        keys.sort();
        assert_eq!(keys, vec![ECHO, FAIL, FAN_OUT, NOOP]);
    }

    #[tokio::test]
    async fn fail_carries_its_failure_types() {
        let err = Fail
            .execute_sync(&context(json!({"message": "boom", "failure_types": ["VERIFICATION"]})))
            .await
            .unwrap_err();
        let info = err.into_failure_info();
        assert_eq!(info.error_message, "boom");
        assert!(info.failure_types.contains(&FailureType::Verification));
    }

    #[tokio::test]
    async fn fail_without_parameters_uses_the_default_message() {
        let err = Fail.execute_sync(&context(Value::Null)).await.unwrap_err();
        assert_eq!(err.into_failure_info().error_message, default_message());
    }

    #[tokio::test]
    async fn echo_returns_outcomes_and_inputs() {
        let ctx = context(json!({"outcomes": {"version": "1.2"}}))
            .with_inputs(BTreeMap::from([("artifact".to_string(), json!("app.tar"))]));
        let response = Echo.execute_sync(&ctx).await.unwrap();
        assert_eq!(response.status, Status::Succeeded);
        assert_eq!(response.outcomes["version"], json!("1.2"));
        assert_eq!(response.outcomes["inputs"], json!({"artifact": "app.tar"}));
    }
}
