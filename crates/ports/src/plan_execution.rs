//! Plan execution repository port.

use async_trait::async_trait;
use stratus_core::PlanExecutionId;
use stratus_execution::PlanExecution;

use crate::error::PortsError;

/// Persistence interface for plan executions.
#[async_trait]
pub trait PlanExecutionRepo: Send + Sync {
    /// Stores a new plan execution.
    async fn insert(&self, plan_execution: PlanExecution) -> Result<(), PortsError>;

    /// Fetches a plan execution.
    async fn get(&self, id: PlanExecutionId) -> Result<Option<PlanExecution>, PortsError>;

    /// Compare-and-swap update, same contract as
    /// [`NodeExecutionRepo::replace`](crate::NodeExecutionRepo::replace).
    async fn replace(
        &self,
        expected_version: u64,
        plan_execution: PlanExecution,
    ) -> Result<bool, PortsError>;
}
