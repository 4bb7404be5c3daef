//! Resource constraint repository port.

use async_trait::async_trait;
use stratus_core::{NodeExecutionId, ResourceConstraintInstanceId, ResourceRestraintId};
use stratus_execution::{ResourceConstraintInstance, ResourceRestraint};

use crate::error::PortsError;

/// Persistence interface for restraints and constraint instances.
///
/// The repository does not serialize acquisitions itself; the constraint
/// engine holds a per-unit critical section around read-decide-write.
#[async_trait]
pub trait ResourceConstraintRepo: Send + Sync {
    /// Stores or replaces a restraint.
    async fn save_restraint(&self, restraint: ResourceRestraint) -> Result<(), PortsError>;

    /// Fetches a restraint.
    async fn get_restraint(
        &self,
        id: ResourceRestraintId,
    ) -> Result<Option<ResourceRestraint>, PortsError>;

    /// Next arrival order for a unit, strictly increasing.
    async fn next_order(
        &self,
        restraint_id: ResourceRestraintId,
        resource_unit: &str,
    ) -> Result<u64, PortsError>;

    /// Stores a new instance.
    async fn insert_instance(&self, instance: ResourceConstraintInstance) -> Result<(), PortsError>;

    /// Overwrites an existing instance.
    async fn update_instance(&self, instance: ResourceConstraintInstance) -> Result<(), PortsError>;

    /// Fetches an instance.
    async fn get_instance(
        &self,
        id: ResourceConstraintInstanceId,
    ) -> Result<Option<ResourceConstraintInstance>, PortsError>;

    /// Unfinished instances of a unit, in arrival order.
    async fn open_instances(
        &self,
        restraint_id: ResourceRestraintId,
        resource_unit: &str,
    ) -> Result<Vec<ResourceConstraintInstance>, PortsError>;

    /// Unfinished instances released by `release_entity_id`.
    async fn open_by_release_entity(
        &self,
        release_entity_id: &str,
    ) -> Result<Vec<ResourceConstraintInstance>, PortsError>;

    /// Unfinished instances acquired by a node execution.
    async fn open_by_node_execution(
        &self,
        node_execution_id: NodeExecutionId,
    ) -> Result<Vec<ResourceConstraintInstance>, PortsError>;
}
