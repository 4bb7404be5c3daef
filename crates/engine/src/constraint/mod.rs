//! Resource constraint engine.
//!
//! A [`ResourceRestraint`] caps how many permits of a resource unit may be
//! held at once. Each acquisition becomes a [`ResourceConstraintInstance`]
//! queued per `(restraint, unit)`. Instances activate strictly in queue
//! order: the walk stops at the first BLOCKED instance that does not fit, so
//! a small request never overtakes a larger one queued before it.
//!
//! Activation is reported as a [`Signal::Callback`] whose correlation id is
//! the instance id, the same way an external system would complete an
//! ASYNC step.

mod step;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use stratus_core::{NodeExecutionId, PlanExecutionId, ResourceConstraintInstanceId, ResourceRestraintId};
use stratus_execution::{
    AcquireMode, AcquireStrategy, ConstraintState, ResourceConstraintInstance, ResourceRestraint,
};
use stratus_ports::ResourceConstraintRepo;

use crate::error::EngineError;
use crate::lock::KeyedLocks;
use crate::signal::{Signal, SignalSender};

pub use step::{RESOURCE_RESTRAINT, ResourceRestraintStep};

type UnitKey = (ResourceRestraintId, String);

/// One request for permits of a resource unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireRequest {
    /// The restraint governing the unit.
    pub restraint_id: ResourceRestraintId,
    /// Which unit of the restraint.
    pub resource_unit: String,
    /// Permits to hold, between 1 and the capacity.
    pub permits: u32,
    /// Block or fail when busy.
    pub mode: AcquireMode,
    /// Used by PRIORITY restraints.
    pub priority: i32,
    /// Instance is released when this entity ends.
    pub release_entity_id: String,
    /// Owning plan execution.
    pub plan_execution_id: PlanExecutionId,
    /// Node execution that asked.
    pub node_execution_id: NodeExecutionId,
}

/// Arbitrates resource units between node executions.
pub struct ResourceConstraintEngine {
    repo: Arc<dyn ResourceConstraintRepo>,
    unit_locks: KeyedLocks<UnitKey>,
    signals: SignalSender,
}

impl ResourceConstraintEngine {
    pub(crate) fn new(repo: Arc<dyn ResourceConstraintRepo>, signals: SignalSender) -> Self {
        Self {
            repo,
            unit_locks: KeyedLocks::new(),
            signals,
        }
    }

    /// Stores a restraint definition.
    ///
    /// # Errors
    ///
    /// A zero capacity, or a storage failure.
    pub async fn register_restraint(&self, restraint: ResourceRestraint) -> Result<(), EngineError> {
        if restraint.capacity == 0 {
            return Err(EngineError::invalid_parameters(
                restraint.name,
                "capacity must be at least 1",
            ));
        }
        tracing::info!(
            resource_restraint_id = %restraint.uuid,
            name = %restraint.name,
            capacity = restraint.capacity,
            strategy = ?restraint.strategy,
            "registered resource restraint"
        );
        self.repo.save_restraint(restraint).await?;
        Ok(())
    }

    /// Queues a request and activates whatever now fits.
    ///
    /// The returned instance is ACTIVE or BLOCKED. A TRY_ONCE request that
    /// cannot activate immediately is not persisted.
    ///
    /// # Errors
    ///
    /// [`EngineError::RestraintNotFound`], and
    /// [`EngineError::ResourceUnavailable`] for requests that can never fit
    /// or TRY_ONCE requests that do not fit now.
    pub async fn acquire(&self, request: AcquireRequest) -> Result<ResourceConstraintInstance, EngineError> {
        let restraint = self.restraint(request.restraint_id).await?;
        if request.permits == 0 || request.permits > restraint.capacity {
            return Err(EngineError::ResourceUnavailable {
                resource_unit: request.resource_unit,
                reason: format!(
                    "{} permits requested, capacity is {}",
                    request.permits, restraint.capacity
                ),
            });
        }

        let key = (restraint.uuid, request.resource_unit.clone());
        let guard = self.unit_locks.lock(key.clone()).await;
        let queued = self.enqueue_locked(&restraint, request).await;
        drop(guard);
        self.unit_locks.release_idle(&key);
        queued
    }

    /// Persists the request and activates what fits. Caller holds the unit lock.
    async fn enqueue_locked(
        &self,
        restraint: &ResourceRestraint,
        request: AcquireRequest,
    ) -> Result<ResourceConstraintInstance, EngineError> {
        let mut queue = self
            .repo
            .open_instances(restraint.uuid, &request.resource_unit)
            .await?;
        let order = self
            .repo
            .next_order(restraint.uuid, &request.resource_unit)
            .await?;
        let candidate = ResourceConstraintInstance {
            uuid: ResourceConstraintInstanceId::new(),
            resource_restraint_id: restraint.uuid,
            resource_unit: request.resource_unit.clone(),
            permits: request.permits,
            order,
            priority: request.priority,
            state: ConstraintState::Blocked,
            release_entity_id: request.release_entity_id,
            plan_execution_id: request.plan_execution_id,
            node_execution_id: request.node_execution_id,
            created_at: chrono::Utc::now(),
            acquired_at: None,
            released_at: None,
        };
        queue.push(candidate.clone());

        let activations = plan_activations(&queue, restraint);
        if request.mode == AcquireMode::TryOnce && !activations.contains(&candidate.uuid) {
            tracing::debug!(
                resource_unit = %request.resource_unit,
                node_execution_id = %request.node_execution_id,
                "try-once acquisition rejected"
            );
            return Err(EngineError::ResourceUnavailable {
                resource_unit: request.resource_unit,
                reason: "unit is busy".into(),
            });
        }

        self.repo.insert_instance(candidate.clone()).await?;
        let mut activated = self.activate(queue, &activations).await?;
        let instance = activated.remove(&candidate.uuid).unwrap_or(candidate);
        tracing::info!(
            resource_constraint_instance_id = %instance.uuid,
            resource_unit = %instance.resource_unit,
            permits = instance.permits,
            state = %instance.state,
            "resource constraint queued"
        );
        Ok(instance)
    }

    /// Releases one instance. Returns `false` if it was already finished.
    ///
    /// # Errors
    ///
    /// Storage failures; unknown instances report `false`.
    pub async fn release_instance(&self, id: ResourceConstraintInstanceId) -> Result<bool, EngineError> {
        let Some(instance) = self.repo.get_instance(id).await? else {
            return Ok(false);
        };
        Ok(self.finish(vec![instance], false).await? > 0)
    }

    /// Releases every open instance held for `release_entity_id`.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn release_for_entity(&self, release_entity_id: &str) -> Result<usize, EngineError> {
        let open = self.repo.open_by_release_entity(release_entity_id).await?;
        if open.is_empty() {
            return Ok(0);
        }
        let released = self.finish(open, false).await?;
        tracing::debug!(release_entity_id, released, "released resource constraints");
        Ok(released)
    }

    /// Drops the BLOCKED instances a node execution is still waiting on.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn abandon_blocked(&self, node_execution_id: NodeExecutionId) -> Result<usize, EngineError> {
        let open = self.repo.open_by_node_execution(node_execution_id).await?;
        self.finish(open, true).await
    }

    /// Looks up an instance.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn instance(
        &self,
        id: ResourceConstraintInstanceId,
    ) -> Result<Option<ResourceConstraintInstance>, EngineError> {
        Ok(self.repo.get_instance(id).await?)
    }

    async fn restraint(&self, id: ResourceRestraintId) -> Result<ResourceRestraint, EngineError> {
        self.repo
            .get_restraint(id)
            .await?
            .ok_or(EngineError::RestraintNotFound { id })
    }

    async fn finish(
        &self,
        instances: Vec<ResourceConstraintInstance>,
        only_blocked: bool,
    ) -> Result<usize, EngineError> {
        let mut by_unit: BTreeMap<UnitKey, Vec<ResourceConstraintInstanceId>> = BTreeMap::new();
        for instance in instances {
            by_unit
                .entry((instance.resource_restraint_id, instance.resource_unit))
                .or_default()
                .push(instance.uuid);
        }

        let mut finished = 0;
        for (key, ids) in by_unit {
            let guard = self.unit_locks.lock(key.clone()).await;
            let unit_finished = self.finish_unit_locked(&key, ids, only_blocked).await;
            drop(guard);
            self.unit_locks.release_idle(&key);
            finished += unit_finished?;
        }
        Ok(finished)
    }

    /// Finishes `ids` on one unit and activates what now fits. Caller holds the unit lock.
    async fn finish_unit_locked(
        &self,
        key: &UnitKey,
        ids: Vec<ResourceConstraintInstanceId>,
        only_blocked: bool,
    ) -> Result<usize, EngineError> {
        let mut finished = 0;
        for id in ids {
            let Some(mut current) = self.repo.get_instance(id).await? else {
                continue;
            };
            let open = match current.state {
                ConstraintState::Blocked => true,
                ConstraintState::Active => !only_blocked,
                ConstraintState::Finished => false,
            };
            if !open {
                continue;
            }
            current.transition_to(ConstraintState::Finished)?;
            self.repo.update_instance(current).await?;
            finished += 1;
        }

        let restraint = self.restraint(key.0).await?;
        let queue = self.repo.open_instances(key.0, &key.1).await?;
        let activations = plan_activations(&queue, &restraint);
        self.activate(queue, &activations).await?;
        Ok(finished)
    }

    /// Persists the activations and signals each one. Caller holds the unit lock.
    async fn activate(
        &self,
        queue: Vec<ResourceConstraintInstance>,
        activations: &[ResourceConstraintInstanceId],
    ) -> Result<BTreeMap<ResourceConstraintInstanceId, ResourceConstraintInstance>, EngineError> {
        let mut activated = BTreeMap::new();
        for mut instance in queue {
            if !activations.contains(&instance.uuid) {
                continue;
            }
            instance.transition_to(ConstraintState::Active)?;
            self.repo.update_instance(instance.clone()).await?;
            tracing::info!(
                resource_constraint_instance_id = %instance.uuid,
                resource_unit = %instance.resource_unit,
                node_execution_id = %instance.node_execution_id,
                "resource constraint active"
            );
            // Nobody listening means the engine is shutting down.
            let _ = self.signals.send(Signal::Callback {
                correlation_id: instance.uuid.to_string(),
                response: json!({
                    "state": ConstraintState::Active,
                    "resource_constraint_instance_id": instance.uuid,
                }),
            });
            activated.insert(instance.uuid, instance);
        }
        Ok(activated)
    }
}

impl std::fmt::Debug for ResourceConstraintEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceConstraintEngine").finish_non_exhaustive()
    }
}

/// BLOCKED instances that become ACTIVE, walking the queue in order.
fn plan_activations(
    queue: &[ResourceConstraintInstance],
    restraint: &ResourceRestraint,
) -> Vec<ResourceConstraintInstanceId> {
    let mut ordered: Vec<&ResourceConstraintInstance> = queue.iter().collect();
    let strategy: AcquireStrategy = restraint.strategy;
    ordered.sort_by(|a, b| a.queue_cmp(b, strategy));

    let mut used: u64 = ordered
        .iter()
        .filter(|i| i.state == ConstraintState::Active)
        .map(|i| u64::from(i.permits))
        .sum();
    let capacity = u64::from(restraint.capacity);

    let mut activations = Vec::new();
    for instance in ordered.iter().filter(|i| i.state == ConstraintState::Blocked) {
        let permits = u64::from(instance.permits);
        if used + permits > capacity {
            break;
        }
        used += permits;
        activations.push(instance.uuid);
    }
    activations
}
