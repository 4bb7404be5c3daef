//! Task dispatch port.
//!
//! External executors run the work of TASK and TASK_CHAIN steps. They report
//! back through the engine's callback entry point using the task id as the
//! correlation id.

use async_trait::async_trait;
use stratus_core::NodeExecutionId;
use stratus_step::TaskRequest;

use crate::error::PortsError;

/// Hands tasks to an external executor.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Queues a task and returns its id, used as the callback correlation id.
    async fn queue_task(
        &self,
        node_execution_id: NodeExecutionId,
        request: &TaskRequest,
    ) -> Result<String, PortsError>;

    /// Best-effort cancellation of a queued or running task.
    async fn abort_task(&self, task_id: &str) -> Result<(), PortsError>;
}
