//! Node execution repository port.

use async_trait::async_trait;
use stratus_core::{NodeExecutionId, PlanExecutionId, PlanNodeId, Status};
use stratus_execution::NodeExecution;

use crate::error::PortsError;

/// Persistence interface for node executions.
///
/// Updates are optimistic: [`replace`](Self::replace) only succeeds when the
/// stored version matches, and [`update_status_if`](Self::update_status_if)
/// only succeeds when the stored status is one of the expected ones.
#[async_trait]
pub trait NodeExecutionRepo: Send + Sync {
    /// Stores a new node execution. Fails with `AlreadyExists` on id reuse.
    async fn insert(&self, node_execution: NodeExecution) -> Result<(), PortsError>;

    /// Fetches a node execution.
    async fn get(&self, id: NodeExecutionId) -> Result<Option<NodeExecution>, PortsError>;

    /// Compare-and-swap update.
    ///
    /// Stores `node_execution` with version `expected_version + 1` when the
    /// stored version equals `expected_version`. Returns `false` on a
    /// version mismatch.
    async fn replace(
        &self,
        expected_version: u64,
        node_execution: NodeExecution,
    ) -> Result<bool, PortsError>;

    /// Atomically sets the status to `to` when the stored status is in
    /// `expected`. Returns the updated record, or `None` if the condition
    /// did not hold.
    async fn update_status_if(
        &self,
        id: NodeExecutionId,
        expected: &[Status],
        to: Status,
    ) -> Result<Option<NodeExecution>, PortsError>;

    /// Children of `parent_id`, oldest first, retried attempts included.
    async fn children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>, PortsError>;

    /// Every node execution of a plan execution, oldest first.
    async fn by_plan_execution(
        &self,
        plan_execution_id: PlanExecutionId,
    ) -> Result<Vec<NodeExecution>, PortsError>;

    /// Latest attempt of `node_id` in a plan execution that was not superseded by a retry.
    async fn latest_for_node(
        &self,
        plan_execution_id: PlanExecutionId,
        node_id: PlanNodeId,
    ) -> Result<Option<NodeExecution>, PortsError>;
}
