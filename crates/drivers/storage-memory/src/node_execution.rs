use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stratus_core::{NodeExecutionId, PlanExecutionId, PlanNodeId, Status};
use stratus_execution::NodeExecution;
use stratus_ports::{NodeExecutionRepo, PortsError};

use crate::{Stored, collect_sorted};

/// In-memory node execution repository.
#[derive(Debug, Default)]
pub struct MemoryNodeExecutionRepo {
    records: DashMap<NodeExecutionId, Stored<NodeExecution>>,
    seq: AtomicU64,
}

impl MemoryNodeExecutionRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored node executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl NodeExecutionRepo for MemoryNodeExecutionRepo {
    async fn insert(&self, node_execution: NodeExecution) -> Result<(), PortsError> {
        let id = node_execution.uuid;
        match self.records.entry(id) {
            Entry::Occupied(_) => {
                Err(PortsError::already_exists("NodeExecution", id.to_string()))
            }
            Entry::Vacant(slot) => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Stored {
                    seq,
                    value: node_execution,
                });
                Ok(())
            }
        }
    }

    async fn get(&self, id: NodeExecutionId) -> Result<Option<NodeExecution>, PortsError> {
        Ok(self.records.get(&id).map(|entry| entry.value.clone()))
    }

    async fn replace(
        &self,
        expected_version: u64,
        mut node_execution: NodeExecution,
    ) -> Result<bool, PortsError> {
        let id = node_execution.uuid;
        let Some(mut entry) = self.records.get_mut(&id) else {
            return Err(PortsError::not_found("NodeExecution", id.to_string()));
        };
        if entry.value.version != expected_version {
            return Ok(false);
        }
        node_execution.version = expected_version + 1;
        entry.value = node_execution;
        Ok(true)
    }

    async fn update_status_if(
        &self,
        id: NodeExecutionId,
        expected: &[Status],
        to: Status,
    ) -> Result<Option<NodeExecution>, PortsError> {
        let Some(mut entry) = self.records.get_mut(&id) else {
            return Err(PortsError::not_found("NodeExecution", id.to_string()));
        };
        if !expected.contains(&entry.value.status) {
            return Ok(None);
        }
        entry
            .value
            .transition_to(to)
            .map_err(|e| PortsError::Internal(e.to_string()))?;
        entry.value.version += 1;
        Ok(Some(entry.value.clone()))
    }

    async fn children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>, PortsError> {
        Ok(collect_sorted(&self.records, |ne| {
            ne.parent_id == Some(parent_id)
        }))
    }

    async fn by_plan_execution(
        &self,
        plan_execution_id: PlanExecutionId,
    ) -> Result<Vec<NodeExecution>, PortsError> {
        Ok(collect_sorted(&self.records, |ne| {
            ne.plan_execution_id() == plan_execution_id
        }))
    }

    async fn latest_for_node(
        &self,
        plan_execution_id: PlanExecutionId,
        node_id: PlanNodeId,
    ) -> Result<Option<NodeExecution>, PortsError> {
        let matches = collect_sorted(&self.records, |ne| {
            ne.plan_execution_id() == plan_execution_id && ne.node_id == node_id && !ne.old_retry
        });
        Ok(matches.into_iter().last())
    }
}
