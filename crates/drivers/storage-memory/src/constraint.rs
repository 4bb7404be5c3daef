use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use stratus_core::{NodeExecutionId, ResourceConstraintInstanceId, ResourceRestraintId};
use stratus_execution::{ConstraintState, ResourceConstraintInstance, ResourceRestraint};
use stratus_ports::{PortsError, ResourceConstraintRepo};

use crate::{Stored, collect_sorted};

/// In-memory resource constraint repository.
#[derive(Debug, Default)]
pub struct MemoryConstraintRepo {
    restraints: DashMap<ResourceRestraintId, ResourceRestraint>,
    instances: DashMap<ResourceConstraintInstanceId, Stored<ResourceConstraintInstance>>,
    orders: DashMap<(ResourceRestraintId, String), u64>,
    seq: AtomicU64,
}

impl MemoryConstraintRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceConstraintRepo for MemoryConstraintRepo {
    async fn save_restraint(&self, restraint: ResourceRestraint) -> Result<(), PortsError> {
        self.restraints.insert(restraint.uuid, restraint);
        Ok(())
    }

    async fn get_restraint(
        &self,
        id: ResourceRestraintId,
    ) -> Result<Option<ResourceRestraint>, PortsError> {
        Ok(self.restraints.get(&id).map(|r| r.clone()))
    }

    async fn next_order(
        &self,
        restraint_id: ResourceRestraintId,
        resource_unit: &str,
    ) -> Result<u64, PortsError> {
        let mut counter = self
            .orders
            .entry((restraint_id, resource_unit.to_owned()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_instance(&self, instance: ResourceConstraintInstance) -> Result<(), PortsError> {
        let id = instance.uuid;
        if self.instances.contains_key(&id) {
            return Err(PortsError::already_exists(
                "ResourceConstraintInstance",
                id.to_string(),
            ));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.instances.insert(
            id,
            Stored {
                seq,
                value: instance,
            },
        );
        Ok(())
    }

    async fn update_instance(&self, instance: ResourceConstraintInstance) -> Result<(), PortsError> {
        let id = instance.uuid;
        let Some(mut entry) = self.instances.get_mut(&id) else {
            return Err(PortsError::not_found(
                "ResourceConstraintInstance",
                id.to_string(),
            ));
        };
        entry.value = instance;
        Ok(())
    }

    async fn get_instance(
        &self,
        id: ResourceConstraintInstanceId,
    ) -> Result<Option<ResourceConstraintInstance>, PortsError> {
        Ok(self.instances.get(&id).map(|entry| entry.value.clone()))
    }

    async fn open_instances(
        &self,
        restraint_id: ResourceRestraintId,
        resource_unit: &str,
    ) -> Result<Vec<ResourceConstraintInstance>, PortsError> {
        let mut open = collect_sorted(&self.instances, |i| {
            i.resource_restraint_id == restraint_id
                && i.resource_unit == resource_unit
                && i.state != ConstraintState::Finished
        });
        open.sort_by_key(|i| i.order);
        Ok(open)
    }

    async fn open_by_release_entity(
        &self,
        release_entity_id: &str,
    ) -> Result<Vec<ResourceConstraintInstance>, PortsError> {
        Ok(collect_sorted(&self.instances, |i| {
            i.release_entity_id == release_entity_id && i.state != ConstraintState::Finished
        }))
    }

    async fn open_by_node_execution(
        &self,
        node_execution_id: NodeExecutionId,
    ) -> Result<Vec<ResourceConstraintInstance>, PortsError> {
        Ok(collect_sorted(&self.instances, |i| {
            i.node_execution_id == node_execution_id && i.state != ConstraintState::Finished
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stratus_core::PlanExecutionId;

    fn instance(
        restraint: ResourceRestraintId,
        order: u64,
        state: ConstraintState,
    ) -> ResourceConstraintInstance {
        ResourceConstraintInstance {
            uuid: ResourceConstraintInstanceId::new(),
            resource_restraint_id: restraint,
            resource_unit: "prod".into(),
            permits: 1,
            order,
            priority: 0,
            state,
            release_entity_id: "pe-1".into(),
            plan_execution_id: PlanExecutionId::new(),
            node_execution_id: NodeExecutionId::new(),
            created_at: chrono::Utc::now(),
            acquired_at: None,
            released_at: None,
        }
    }

    #[tokio::test]
    async fn next_order_increases_per_unit() {
        let repo = MemoryConstraintRepo::new();
        let restraint = ResourceRestraintId::new();
        assert_eq!(repo.next_order(restraint, "prod").await.unwrap(), 1);
        assert_eq!(repo.next_order(restraint, "prod").await.unwrap(), 2);
        assert_eq!(repo.next_order(restraint, "qa").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn open_instances_exclude_finished_and_sort_by_order() {
        let repo = MemoryConstraintRepo::new();
        let restraint = ResourceRestraintId::new();
        let late = instance(restraint, 3, ConstraintState::Blocked);
        let early = instance(restraint, 1, ConstraintState::Active);
        let done = instance(restraint, 2, ConstraintState::Finished);
        for i in [late.clone(), early.clone(), done] {
            repo.insert_instance(i).await.unwrap();
        }

        let open: Vec<_> = repo
            .open_instances(restraint, "prod")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.uuid)
            .collect();
        assert_eq!(open, vec![early.uuid, late.uuid]);
        assert_eq!(repo.open_by_release_entity("pe-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_unknown_instance_fails() {
        let repo = MemoryConstraintRepo::new();
        let err = repo
            .update_instance(instance(ResourceRestraintId::new(), 1, ConstraintState::Blocked))
            .await
            .unwrap_err();
        assert!(matches!(err, PortsError::NotFound { .. }));
    }
}
