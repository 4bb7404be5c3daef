//! Interrupt repository port.

use async_trait::async_trait;
use stratus_core::{InterruptId, NodeExecutionId, PlanExecutionId};
use stratus_execution::{Interrupt, InterruptState};

use crate::error::PortsError;

/// Persistence interface for interrupts.
#[async_trait]
pub trait InterruptRepo: Send + Sync {
    /// Registers `interrupt` unless an interrupt with the same
    /// [`dedup_key`](Interrupt::dedup_key) is still registered or processing.
    ///
    /// Check and insert are one atomic step. Returns the stored interrupt
    /// and `true` when it was newly registered, or the existing duplicate
    /// and `false`.
    async fn register_if_absent(&self, interrupt: Interrupt) -> Result<(Interrupt, bool), PortsError>;

    /// Fetches an interrupt.
    async fn get(&self, id: InterruptId) -> Result<Option<Interrupt>, PortsError>;

    /// Moves an interrupt from `from` to `to` when its stored state is `from`.
    ///
    /// `failure_reason` is recorded when given. Returns `false` when the
    /// stored state was not `from`.
    async fn transition(
        &self,
        id: InterruptId,
        from: InterruptState,
        to: InterruptState,
        failure_reason: Option<String>,
    ) -> Result<bool, PortsError>;

    /// Interrupts of a plan execution, oldest first.
    async fn by_plan_execution(
        &self,
        plan_execution_id: PlanExecutionId,
    ) -> Result<Vec<Interrupt>, PortsError>;

    /// Interrupts targeting a node execution, oldest first.
    async fn by_node_execution(
        &self,
        node_execution_id: NodeExecutionId,
    ) -> Result<Vec<Interrupt>, PortsError>;
}
