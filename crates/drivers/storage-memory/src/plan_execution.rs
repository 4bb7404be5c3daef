use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stratus_core::PlanExecutionId;
use stratus_execution::PlanExecution;
use stratus_ports::{PlanExecutionRepo, PortsError};

/// In-memory plan execution repository.
#[derive(Debug, Default)]
pub struct MemoryPlanExecutionRepo {
    records: DashMap<PlanExecutionId, PlanExecution>,
}

impl MemoryPlanExecutionRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanExecutionRepo for MemoryPlanExecutionRepo {
    async fn insert(&self, plan_execution: PlanExecution) -> Result<(), PortsError> {
        let id = plan_execution.uuid;
        match self.records.entry(id) {
            Entry::Occupied(_) => {
                Err(PortsError::already_exists("PlanExecution", id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(plan_execution);
                Ok(())
            }
        }
    }

    async fn get(&self, id: PlanExecutionId) -> Result<Option<PlanExecution>, PortsError> {
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn replace(
        &self,
        expected_version: u64,
        mut plan_execution: PlanExecution,
    ) -> Result<bool, PortsError> {
        let id = plan_execution.uuid;
        let Some(mut entry) = self.records.get_mut(&id) else {
            return Err(PortsError::not_found("PlanExecution", id.to_string()));
        };
        if entry.version != expected_version {
            return Ok(false);
        }
        plan_execution.version = expected_version + 1;
        *entry = plan_execution;
        Ok(true)
    }
}
