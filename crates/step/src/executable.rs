//! Step capabilities, one trait per execution mode.
//!
//! A step implements exactly the capability matching the mode its
//! facilitator selects, and registers as the corresponding [`Executable`]
//! variant. The engine never downcasts: the variant *is* the capability.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_core::PlanNodeId;
use stratus_execution::{ChildOutcome, ExecutionMode, StepResponse};

use crate::context::StepContext;
use crate::error::StepError;

/// Work handed to an external task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Kind of task, interpreted by the executor.
    pub task_type: String,
    /// Task payload.
    #[serde(default)]
    pub parameters: Value,
}

impl TaskRequest {
    /// Creates a task request.
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
        }
    }
}

/// Callbacks an async step waits for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AsyncExecutableResponse {
    /// Correlation ids; the node resumes once every one has a response.
    pub callback_ids: Vec<String>,
}

impl AsyncExecutableResponse {
    /// Waits on the given correlation ids.
    pub fn new(callback_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            callback_ids: callback_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// One link of a task chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskChainResponse {
    /// Task for this link; `None` finalizes without queueing anything.
    pub task_request: Option<TaskRequest>,
    /// This link is the last one.
    pub chain_end: bool,
    /// State handed to the next link.
    #[serde(default)]
    pub pass_through: Value,
}

/// The single child a child step spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildExecutableResponse {
    /// Plan node to run as the child.
    pub child_node_id: PlanNodeId,
}

/// The children a children step spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildrenExecutableResponse {
    /// Plan nodes to run as children, in start order.
    pub children: Vec<PlanNodeId>,
    /// How many children may run at once; `None` runs all of them.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// One link of a child chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildChainResponse {
    /// Child to run next; `None` finalizes immediately.
    pub next_child_id: Option<PlanNodeId>,
    /// This link is the last one.
    pub last_link: bool,
    /// State handed to the next link.
    #[serde(default)]
    pub pass_through: Value,
}

/// Runs inline and responds immediately.
#[async_trait]
pub trait SyncExecutable: Send + Sync {
    /// Executes the step.
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse, StepError>;
}

/// Starts external work and resumes on callbacks.
#[async_trait]
pub trait AsyncExecutable: Send + Sync {
    /// Starts the work and names the callbacks to wait for.
    async fn execute_async(&self, ctx: &StepContext) -> Result<AsyncExecutableResponse, StepError>;

    /// Builds the response once every callback arrived.
    async fn handle_async_response(
        &self,
        ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<StepResponse, StepError>;

    /// Best-effort cancellation of the external work.
    async fn handle_abort(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }
}

/// Hands one task to an external executor.
#[async_trait]
pub trait TaskExecutable: Send + Sync {
    /// Builds the task.
    async fn obtain_task(&self, ctx: &StepContext) -> Result<TaskRequest, StepError>;

    /// Builds the response from the task result.
    async fn handle_task_result(
        &self,
        ctx: &StepContext,
        result: &Value,
    ) -> Result<StepResponse, StepError>;
}

/// Hands a sequence of tasks to an external executor.
#[async_trait]
pub trait TaskChainExecutable: Send + Sync {
    /// First link.
    async fn start_chain_link(&self, ctx: &StepContext) -> Result<TaskChainResponse, StepError>;

    /// Next link, given the previous link's result.
    async fn execute_next_link(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        result: &Value,
    ) -> Result<TaskChainResponse, StepError>;

    /// Builds the response after the last link.
    async fn finalize_execution(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        result: &Value,
    ) -> Result<StepResponse, StepError>;
}

/// Spawns one child node.
#[async_trait]
pub trait ChildExecutable: Send + Sync {
    /// Names the child.
    async fn obtain_child(&self, ctx: &StepContext) -> Result<ChildExecutableResponse, StepError>;

    /// Builds the response once the child concluded.
    async fn handle_child_response(
        &self,
        ctx: &StepContext,
        outcomes: &[ChildOutcome],
    ) -> Result<StepResponse, StepError>;
}

/// Spawns several child nodes.
#[async_trait]
pub trait ChildrenExecutable: Send + Sync {
    /// Names the children.
    async fn obtain_children(
        &self,
        ctx: &StepContext,
    ) -> Result<ChildrenExecutableResponse, StepError>;

    /// Builds the response once every child concluded.
    async fn handle_children_response(
        &self,
        ctx: &StepContext,
        outcomes: &[ChildOutcome],
    ) -> Result<StepResponse, StepError>;
}

/// Runs child nodes one after another.
#[async_trait]
pub trait ChildChainExecutable: Send + Sync {
    /// First link.
    async fn execute_first_child(&self, ctx: &StepContext) -> Result<ChildChainResponse, StepError>;

    /// Next link, given the child that just concluded.
    async fn execute_next_child(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        last: &ChildOutcome,
    ) -> Result<ChildChainResponse, StepError>;

    /// Builds the response after the last link.
    async fn finalize_execution(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        outcomes: &[ChildOutcome],
    ) -> Result<StepResponse, StepError>;
}

/// A registered step, tagged with its capability.
#[derive(Clone)]
pub enum Executable {
    /// [`SyncExecutable`].
    Sync(Arc<dyn SyncExecutable>),
    /// [`AsyncExecutable`].
    Async(Arc<dyn AsyncExecutable>),
    /// [`TaskExecutable`].
    Task(Arc<dyn TaskExecutable>),
    /// [`TaskChainExecutable`].
    TaskChain(Arc<dyn TaskChainExecutable>),
    /// [`ChildExecutable`].
    Child(Arc<dyn ChildExecutable>),
    /// [`ChildrenExecutable`].
    Children(Arc<dyn ChildrenExecutable>),
    /// [`ChildChainExecutable`].
    ChildChain(Arc<dyn ChildChainExecutable>),
}

impl Executable {
    /// Mode this capability serves.
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Async(_) => ExecutionMode::Async,
            Self::Task(_) => ExecutionMode::Task,
            Self::TaskChain(_) => ExecutionMode::TaskChain,
            Self::Child(_) => ExecutionMode::Child,
            Self::Children(_) => ExecutionMode::Children,
            Self::ChildChain(_) => ExecutionMode::ChildChain,
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Executable").field(&self.mode()).finish()
    }
}
