//! Step responses, execution modes and child outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_core::{NodeExecutionId, PlanNodeId, Status};

use crate::failure::{FailureInfo, FailureType};

/// How the engine drives a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run inline and respond immediately.
    Sync,
    /// Start work and wait for callbacks.
    Async,
    /// Hand one task to an external executor.
    Task,
    /// Hand a sequence of tasks to an external executor.
    TaskChain,
    /// Spawn one child node.
    Child,
    /// Spawn several child nodes.
    Children,
    /// Run child nodes one after another.
    ChildChain,
}

impl ExecutionMode {
    /// Status a node sits in while this mode waits on something external.
    pub fn waiting_status(self) -> Status {
        match self {
            Self::Sync => Status::Running,
            Self::Async => Status::AsyncWaiting,
            Self::Task | Self::TaskChain => Status::TaskWaiting,
            Self::Child | Self::Children | Self::ChildChain => Status::ChildWaiting,
        }
    }

    /// Returns `true` for the modes that spawn child node executions.
    pub fn spawns_children(self) -> bool {
        matches!(self, Self::Child | Self::Children | Self::ChildChain)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Task => "task",
            Self::TaskChain => "task_chain",
            Self::Child => "child",
            Self::Children => "children",
            Self::ChildChain => "child_chain",
        };
        f.write_str(name)
    }
}

/// Result of running a step.
///
/// Failures are data: a failed step yields a response with a broke status
/// and a [`FailureInfo`], never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Raw status reported by the step.
    pub status: Status,
    /// Why the step failed, if it did.
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
    /// Named outputs other nodes may reference.
    #[serde(default)]
    pub outcomes: BTreeMap<String, Value>,
}

impl StepResponse {
    /// Response with the given status.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            failure_info: None,
            outcomes: BTreeMap::new(),
        }
    }

    /// Successful response.
    pub fn succeeded() -> Self {
        Self::new(Status::Succeeded)
    }

    /// Skipped response.
    pub fn skipped() -> Self {
        Self::new(Status::Skipped)
    }

    /// Failed response.
    pub fn failed(failure_info: FailureInfo) -> Self {
        Self::new(Status::Failed).with_failure(failure_info)
    }

    /// Attaches failure information.
    pub fn with_failure(mut self, failure_info: FailureInfo) -> Self {
        self.failure_info = Some(failure_info);
        self
    }

    /// Adds a named outcome.
    pub fn with_outcome(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outcomes.insert(name.into(), value);
        self
    }
}

/// What a parent sees of a concluded child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildOutcome {
    /// Child node execution.
    pub node_execution_id: NodeExecutionId,
    /// Plan node the child ran.
    pub node_id: PlanNodeId,
    /// Terminal status of the child.
    pub status: Status,
    /// Child failure, if any.
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
    /// Child outcomes.
    #[serde(default)]
    pub outcomes: BTreeMap<String, Value>,
}

/// Folds child outcomes into a single parent response.
///
/// Aborted children win over broke ones, broke ones over positive ones. An
/// empty slice succeeds.
pub fn aggregate_child_outcomes(outcomes: &[ChildOutcome]) -> StepResponse {
    if outcomes.iter().any(|outcome| outcome.status == Status::Aborted) {
        return StepResponse::new(Status::Aborted);
    }

    let broke: Vec<&ChildOutcome> = outcomes
        .iter()
        .filter(|outcome| outcome.status.is_broke())
        .collect();
    if broke.is_empty() {
        return StepResponse::succeeded();
    }

    let mut failure = FailureInfo::new(
        broke
            .iter()
            .filter_map(|outcome| outcome.failure_info.as_ref())
            .map(|info| info.error_message.as_str())
            .filter(|message| !message.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
    );
    for outcome in &broke {
        match &outcome.failure_info {
            Some(info) => failure.failure_types.extend(info.failure_types.iter().copied()),
            None => {
                failure.failure_types.insert(FailureType::Unknown);
            }
        }
    }

    let status = if broke.iter().all(|outcome| outcome.status == Status::Expired) {
        Status::Expired
    } else {
        Status::Failed
    };
    StepResponse::new(status).with_failure(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(status: Status, failure_info: Option<FailureInfo>) -> ChildOutcome {
        ChildOutcome {
            node_execution_id: NodeExecutionId::new(),
            node_id: PlanNodeId::new(),
            status,
            failure_info,
            outcomes: BTreeMap::new(),
        }
    }

    #[test]
    fn waiting_status_per_mode() {
        assert_eq!(ExecutionMode::Sync.waiting_status(), Status::Running);
        assert_eq!(ExecutionMode::Async.waiting_status(), Status::AsyncWaiting);
        assert_eq!(ExecutionMode::TaskChain.waiting_status(), Status::TaskWaiting);
        assert_eq!(ExecutionMode::ChildChain.waiting_status(), Status::ChildWaiting);
        assert!(ExecutionMode::Children.spawns_children());
        assert!(!ExecutionMode::Task.spawns_children());
    }

    #[test]
    fn empty_children_succeed() {
        assert_eq!(aggregate_child_outcomes(&[]), StepResponse::succeeded());
    }

    #[test]
    fn all_positive_children_succeed() {
        let outcomes = [outcome(Status::Succeeded, None), outcome(Status::Skipped, None)];
        assert_eq!(aggregate_child_outcomes(&outcomes).status, Status::Succeeded);
    }

    #[test]
    fn broke_children_merge_failure_types() {
        let outcomes = [
            outcome(Status::Succeeded, None),
            outcome(
                Status::Failed,
                Some(FailureInfo::new("tests failed").with_type(FailureType::ApplicationError)),
            ),
            outcome(Status::Expired, Some(FailureInfo::timeout("slow"))),
        ];
        let response = aggregate_child_outcomes(&outcomes);
        assert_eq!(response.status, Status::Failed);
        let failure = response.failure_info.unwrap();
        assert_eq!(failure.error_message, "tests failed; slow");
        assert!(failure.failure_types.contains(&FailureType::ApplicationError));
        assert!(failure.failure_types.contains(&FailureType::Timeout));
    }

    #[test]
    fn only_expired_children_expire_parent() {
        let outcomes = [outcome(Status::Expired, None)];
        let response = aggregate_child_outcomes(&outcomes);
        assert_eq!(response.status, Status::Expired);
        assert!(response.failure_info.unwrap().failure_types.contains(&FailureType::Unknown));
    }

    #[test]
    fn aborted_child_aborts_parent() {
        let outcomes = [outcome(Status::Failed, None), outcome(Status::Aborted, None)];
        assert_eq!(aggregate_child_outcomes(&outcomes).status, Status::Aborted);
    }
}
