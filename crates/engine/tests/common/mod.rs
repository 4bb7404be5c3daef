//! Shared harness for the engine integration tests.
//!
//! Every test builds its own engine over in-memory storage and a small set
//! of steps whose behavior is driven by their step parameters.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use stratus_core::{NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId, Status, StepType};
use stratus_engine::{EngineConfig, OrchestrationEngine};
use stratus_execution::{
    ChildOutcome, FailureInfo, FailureType, NodeExecution, PlanExecution, StepResponse,
    aggregate_child_outcomes,
};
use stratus_plan::{
    AdviserObtainment, AdviserType, FacilitatorObtainment, FacilitatorType, Plan, PlanNode,
};
use stratus_ports::{NodeExecutionRepo, PortsError};
use stratus_queue_memory::MemoryTaskQueue;
use stratus_step::{
    AsyncExecutable, AsyncExecutableResponse, ChildChainExecutable, ChildChainResponse,
    ChildrenExecutable, ChildrenExecutableResponse, Executable, StepContext, StepError,
    StepRegistry, SyncExecutable, TaskChainExecutable, TaskChainResponse, TaskRequest,
};
use stratus_storage_memory::MemoryStorage;

pub const OUTCOME: &str = "OUTCOME";
pub const AWAIT: &str = "AWAIT";
pub const FAN_OUT: &str = "FAN_OUT";
pub const RELAY: &str = "RELAY";
pub const PIPELINE: &str = "PIPELINE";

const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Test steps
// ---------------------------------------------------------------------------

/// Attempts per plan node, shared by every [`OutcomeStep`] call.
pub type Attempts = Arc<Mutex<HashMap<PlanNodeId, u32>>>;

fn succeeded() -> Status {
    Status::Succeeded
}

#[derive(Debug, Deserialize)]
struct OutcomeParameters {
    #[serde(default = "succeeded")]
    status: Status,
    #[serde(default)]
    failure_types: Vec<FailureType>,
    /// Fail the first `fail_times` attempts of the node, then use `status`.
    #[serde(default)]
    fail_times: u32,
    #[serde(default)]
    outcomes: BTreeMap<String, Value>,
}

/// SYNC step answering with the status and outcomes it is configured with.
///
/// Resolved inputs are echoed back as the `inputs` outcome.
struct OutcomeStep {
    attempts: Attempts,
}

#[async_trait]
impl SyncExecutable for OutcomeStep {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse, StepError> {
        let params: OutcomeParameters = ctx.parameters()?;
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(ctx.node_id).or_default();
            *count += 1;
            *count
        };
        let status = if attempt <= params.fail_times {
            Status::Failed
        } else {
            params.status
        };

        let mut response = StepResponse::new(status);
        if status.is_broke() {
            let mut failure = FailureInfo::new(format!("attempt {attempt} failed"));
            for failure_type in params.failure_types {
                failure = failure.with_type(failure_type);
            }
            response = response.with_failure(failure);
        }
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
struct AwaitParameters {
    callbacks: Vec<String>,
}

/// ASYNC step waiting for the callbacks named in its parameters.
struct AwaitStep {
    aborted: Arc<Mutex<Vec<NodeExecutionId>>>,
}

#[async_trait]
impl AsyncExecutable for AwaitStep {
    async fn execute_async(&self, ctx: &StepContext) -> Result<AsyncExecutableResponse, StepError> {
        let params: AwaitParameters = ctx.parameters()?;
        Ok(AsyncExecutableResponse::new(params.callbacks))
    }

    async fn handle_async_response(
        &self,
        _ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<StepResponse, StepError> {
        Ok(StepResponse::succeeded().with_outcome("responses", json!(responses)))
    }

    async fn handle_abort(&self, ctx: &StepContext) -> Result<(), StepError> {
        self.aborted.lock().push(ctx.node_execution_id);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenParameters {
    children: Vec<PlanNodeId>,
    #[serde(default)]
    max_concurrency: Option<usize>,
}

/// CHILDREN step spawning every listed node.
struct FanOutStep;

#[async_trait]
impl ChildrenExecutable for FanOutStep {
    async fn obtain_children(
        &self,
        ctx: &StepContext,
    ) -> Result<ChildrenExecutableResponse, StepError> {
        let params: ChildrenParameters = ctx.parameters()?;
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
        Ok(aggregate_child_outcomes(outcomes))
    }
}

/// CHILD_CHAIN step running the listed nodes one after another.
///
/// The pass-through value is the index of the next child.
struct RelayStep;

impl RelayStep {
    fn link(children: &[PlanNodeId], index: usize) -> ChildChainResponse {
        ChildChainResponse {
            next_child_id: children.get(index).copied(),
            last_link: index + 1 >= children.len(),
            pass_through: json!(index + 1),
        }
    }
}

#[async_trait]
impl ChildChainExecutable for RelayStep {
    async fn execute_first_child(&self, ctx: &StepContext) -> Result<ChildChainResponse, StepError> {
        let params: ChildrenParameters = ctx.parameters()?;
        Ok(Self::link(&params.children, 0))
    }

    async fn execute_next_child(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        last: &ChildOutcome,
    ) -> Result<ChildChainResponse, StepError> {
        if last.status.is_broke() {
            return Ok(ChildChainResponse {
                next_child_id: None,
                last_link: true,
                pass_through: pass_through.clone(),
            });
        }
        let params: ChildrenParameters = ctx.parameters()?;
        let index = pass_through.as_u64().unwrap_or_default() as usize;
        Ok(Self::link(&params.children, index))
    }

    async fn finalize_execution(
        &self,
        _ctx: &StepContext,
        _pass_through: &Value,
        outcomes: &[ChildOutcome],
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_child_outcomes(outcomes)
            .with_outcome("links", json!(outcomes.len())))
    }
}

#[derive(Debug, Deserialize)]
struct PipelineParameters {
    tasks: Vec<String>,
}

/// TASK_CHAIN step queuing the listed task types in order.
///
/// The pass-through value collects the result of every finished task.
struct PipelineStep;

impl PipelineStep {
    fn link(tasks: &[String], results: Vec<Value>) -> TaskChainResponse {
        let index = results.len();
        TaskChainResponse {
            task_request: tasks
                .get(index)
                .map(|task_type| TaskRequest::new(task_type.clone(), json!({"index": index}))),
            chain_end: index + 1 >= tasks.len(),
            pass_through: json!(results),
        }
    }

    fn results(pass_through: &Value, result: &Value) -> Vec<Value> {
        let mut results = pass_through.as_array().cloned().unwrap_or_default();
        results.push(result.clone());
        results
    }
}

#[async_trait]
impl TaskChainExecutable for PipelineStep {
    async fn start_chain_link(&self, ctx: &StepContext) -> Result<TaskChainResponse, StepError> {
        let params: PipelineParameters = ctx.parameters()?;
        Ok(Self::link(&params.tasks, Vec::new()))
    }

    async fn execute_next_link(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        result: &Value,
    ) -> Result<TaskChainResponse, StepError> {
        let params: PipelineParameters = ctx.parameters()?;
        Ok(Self::link(&params.tasks, Self::results(pass_through, result)))
    }

    async fn finalize_execution(
        &self,
        _ctx: &StepContext,
        pass_through: &Value,
        result: &Value,
    ) -> Result<StepResponse, StepError> {
        Ok(StepResponse::succeeded()
            .with_outcome("results", json!(Self::results(pass_through, result))))
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Node execution storage whose reads can be made to fail.
pub struct FlakyNodeExecutions {
    inner: Arc<dyn NodeExecutionRepo>,
    failing_reads: AtomicU32,
}

impl FlakyNodeExecutions {
    /// The next `n` point reads fail with an internal error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeExecutionRepo for FlakyNodeExecutions {
    async fn insert(&self, node_execution: NodeExecution) -> Result<(), PortsError> {
        self.inner.insert(node_execution).await
    }

    async fn get(&self, id: NodeExecutionId) -> Result<Option<NodeExecution>, PortsError> {
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PortsError::Internal("storage unavailable".into()));
        }
        self.inner.get(id).await
    }

    async fn replace(&self, expected_version: u64, node_execution: NodeExecution) -> Result<bool, PortsError> {
        self.inner.replace(expected_version, node_execution).await
    }

    async fn update_status_if(
        &self,
        id: NodeExecutionId,
        expected: &[Status],
        to: Status,
    ) -> Result<Option<NodeExecution>, PortsError> {
        self.inner.update_status_if(id, expected, to).await
    }

    async fn children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>, PortsError> {
        self.inner.children(parent_id).await
    }

    async fn by_plan_execution(&self, plan_execution_id: PlanExecutionId) -> Result<Vec<NodeExecution>, PortsError> {
        self.inner.by_plan_execution(plan_execution_id).await
    }

    async fn latest_for_node(
        &self,
        plan_execution_id: PlanExecutionId,
        node_id: PlanNodeId,
    ) -> Result<Option<NodeExecution>, PortsError> {
        self.inner.latest_for_node(plan_execution_id, node_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: OrchestrationEngine,
    pub queue: Arc<MemoryTaskQueue>,
    pub node_executions: Arc<FlakyNodeExecutions>,
    pub attempts: Attempts,
    pub aborted: Arc<Mutex<Vec<NodeExecutionId>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        stratus_log::init_test();
        let storage = MemoryStorage::new();
        let node_executions = Arc::new(FlakyNodeExecutions {
            inner: storage.node_executions,
            failing_reads: AtomicU32::new(0),
        });
        let queue = Arc::new(MemoryTaskQueue::new(64));
        let attempts = Attempts::default();
        let aborted = Arc::new(Mutex::new(Vec::new()));

        let steps = StepRegistry::new();
        steps.register(
            OUTCOME,
            Executable::Sync(Arc::new(OutcomeStep {
                attempts: Arc::clone(&attempts),
            })),
        );
        steps.register(
            AWAIT,
            Executable::Async(Arc::new(AwaitStep {
                aborted: Arc::clone(&aborted),
            })),
        );
        steps.register(FAN_OUT, Executable::Children(Arc::new(FanOutStep)));
        steps.register(RELAY, Executable::ChildChain(Arc::new(RelayStep)));
        steps.register(PIPELINE, Executable::TaskChain(Arc::new(PipelineStep)));

        let engine = OrchestrationEngine::builder()
            .node_executions(node_executions.clone())
            .plan_executions(storage.plan_executions)
            .interrupts(storage.interrupts)
            .constraints(storage.constraints)
            .steps(steps)
            .task_dispatcher(queue.clone())
            .config(config)
            .build()
            .expect("engine builds");

        Self {
            engine,
            queue,
            node_executions,
            attempts,
            aborted,
        }
    }

    pub async fn start(&self, plan: Plan) -> PlanExecutionId {
        self.engine
            .start_plan(plan, BTreeMap::new())
            .await
            .expect("plan starts")
    }

    pub fn attempts_of(&self, node: &PlanNode) -> u32 {
        self.attempts.lock().get(&node.uuid).copied().unwrap_or(0)
    }

    /// Waits until the plan execution reaches `status`.
    pub async fn plan_reaches(&self, id: PlanExecutionId, status: Status) -> PlanExecution {
        let engine = &self.engine;
        eventually(&format!("plan execution {id} to be {status}"), || async move {
            engine
                .plan_execution(id)
                .await
                .expect("plan execution loads")
                .filter(|pe| pe.status == status)
        })
        .await
    }

    /// Waits until the latest execution of `node` reaches `status`.
    pub async fn node_reaches(&self, id: PlanExecutionId, node: &PlanNode, status: Status) -> NodeExecution {
        let engine = &self.engine;
        let node_id = node.uuid;
        eventually(&format!("{} to be {status}", node.identifier), || async move {
            engine
                .latest_for_node(id, node_id)
                .await
                .expect("node executions load")
                .filter(|ne| ne.status == status)
        })
        .await
    }

    /// Every execution of `node`, oldest first.
    pub async fn executions_of(&self, id: PlanExecutionId, node: &PlanNode) -> Vec<NodeExecution> {
        let mut executions: Vec<NodeExecution> = self
            .engine
            .node_executions(id)
            .await
            .expect("node executions load")
            .into_iter()
            .filter(|ne| ne.node_id == node.uuid)
            .collect();
        executions.sort_by_key(|ne| ne.created_at);
        executions
    }
}

/// Polls `check` until it yields a value or the wait budget runs out.
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(POLL).await;
    }
}

// ---------------------------------------------------------------------------
// Plan helpers
// ---------------------------------------------------------------------------

/// A plan starting at the first node.
pub fn plan(nodes: Vec<PlanNode>) -> Plan {
    let start = nodes.first().map(|node| node.uuid).expect("at least one node");
    Plan::new(PlanId::new(), start, nodes)
}

pub fn outcome_node(identifier: &str, parameters: Value) -> PlanNode {
    PlanNode::new(identifier, StepType::step(OUTCOME)).with_step_parameters(parameters)
}

pub fn await_node(identifier: &str, callbacks: &[&str]) -> PlanNode {
    PlanNode::new(identifier, StepType::step(AWAIT))
        .with_facilitator(FacilitatorObtainment::new(FacilitatorType::ASYNC))
        .with_step_parameters(json!({ "callbacks": callbacks }))
}

pub fn fan_out_node(identifier: &str, children: &[&PlanNode], max_concurrency: Option<usize>) -> PlanNode {
    let children: Vec<PlanNodeId> = children.iter().map(|child| child.uuid).collect();
    PlanNode::new(identifier, StepType::step(FAN_OUT))
        .with_facilitator(FacilitatorObtainment::new(FacilitatorType::CHILDREN))
        .with_step_parameters(json!({
            "children": children,
            "max_concurrency": max_concurrency,
        }))
}

pub fn relay_node(identifier: &str, children: &[&PlanNode]) -> PlanNode {
    let children: Vec<PlanNodeId> = children.iter().map(|child| child.uuid).collect();
    PlanNode::new(identifier, StepType::step(RELAY))
        .with_facilitator(FacilitatorObtainment::new(FacilitatorType::CHILD_CHAIN))
        .with_step_parameters(json!({ "children": children }))
}

pub fn pipeline_node(identifier: &str, tasks: &[&str]) -> PlanNode {
    PlanNode::new(identifier, StepType::step(PIPELINE))
        .with_facilitator(FacilitatorObtainment::new(FacilitatorType::TASK_CHAIN))
        .with_step_parameters(json!({ "tasks": tasks }))
}

pub fn adviser(adviser_type: AdviserType, parameters: Value) -> AdviserObtainment {
    AdviserObtainment::new(adviser_type).with_parameters(parameters)
}

pub fn on_success(next: &PlanNode) -> AdviserObtainment {
    adviser(AdviserType::ON_SUCCESS, json!({ "next_node_id": next.uuid }))
}
