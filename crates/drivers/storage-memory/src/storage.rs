use std::sync::Arc;

use stratus_ports::{InterruptRepo, NodeExecutionRepo, PlanExecutionRepo, ResourceConstraintRepo};

use crate::{
    MemoryConstraintRepo, MemoryInterruptRepo, MemoryNodeExecutionRepo, MemoryPlanExecutionRepo,
};

/// One of each in-memory repository, shared as trait objects.
#[derive(Clone)]
pub struct MemoryStorage {
    /// Node executions.
    pub node_executions: Arc<dyn NodeExecutionRepo>,
    /// Plan executions.
    pub plan_executions: Arc<dyn PlanExecutionRepo>,
    /// Interrupts.
    pub interrupts: Arc<dyn InterruptRepo>,
    /// Restraints and constraint instances.
    pub constraints: Arc<dyn ResourceConstraintRepo>,
}

impl MemoryStorage {
    /// Creates empty repositories.
    #[must_use]
    pub fn new() -> Self {
        Self {
            node_executions: Arc::new(MemoryNodeExecutionRepo::new()),
            plan_executions: Arc::new(MemoryPlanExecutionRepo::new()),
            interrupts: Arc::new(MemoryInterruptRepo::new()),
            constraints: Arc::new(MemoryConstraintRepo::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}
