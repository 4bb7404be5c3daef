//! Resource restraints and the constraint instances that hold them.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{
    NodeExecutionId, PlanExecutionId, ResourceConstraintInstanceId, ResourceRestraintId,
};

use crate::error::ExecutionError;
use crate::transition::validate_constraint_transition;

/// Queueing strategy of a restraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquireStrategy {
    /// First come, first served.
    #[default]
    Fifo,
    /// Higher priority first, then arrival order.
    Priority,
}

/// What to do when the unit is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquireMode {
    /// Queue and wait.
    #[default]
    Ensure,
    /// Fail immediately.
    TryOnce,
}

/// Scope after which a held constraint is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldingScope {
    /// Released when the plan execution ends.
    #[default]
    Plan,
    /// Released when the enclosing stage concludes.
    Stage,
    /// Released when the acquiring node's parent concludes.
    Parent,
}

/// State of a constraint instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintState {
    /// Queued behind other holders.
    Blocked,
    /// Holding permits.
    Active,
    /// Released or abandoned.
    Finished,
}

impl fmt::Display for ConstraintState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Blocked => "BLOCKED",
            Self::Active => "ACTIVE",
            Self::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

/// A named, capacity-limited resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRestraint {
    /// Unique id.
    pub uuid: ResourceRestraintId,
    /// Display name.
    pub name: String,
    /// Permits available per resource unit.
    pub capacity: u32,
    /// Queueing strategy.
    #[serde(default)]
    pub strategy: AcquireStrategy,
}

impl ResourceRestraint {
    /// Creates a FIFO restraint.
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            uuid: ResourceRestraintId::new(),
            name: name.into(),
            capacity,
            strategy: AcquireStrategy::Fifo,
        }
    }

    /// Sets the strategy.
    pub fn with_strategy(mut self, strategy: AcquireStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// A claim on permits of one resource unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConstraintInstance {
    /// Unique id, also the callback correlation id of the acquiring step.
    pub uuid: ResourceConstraintInstanceId,
    /// Restraint being claimed.
    pub resource_restraint_id: ResourceRestraintId,
    /// Unit within the restraint, e.g. an environment name.
    pub resource_unit: String,
    /// Permits claimed.
    pub permits: u32,
    /// Arrival order within the unit.
    pub order: u64,
    /// Priority under [`AcquireStrategy::Priority`].
    #[serde(default)]
    pub priority: i32,
    /// Current state.
    pub state: ConstraintState,
    /// Entity whose end releases this instance.
    pub release_entity_id: String,
    /// Plan execution that acquired.
    pub plan_execution_id: PlanExecutionId,
    /// Node execution that acquired.
    pub node_execution_id: NodeExecutionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Activation time.
    #[serde(default)]
    pub acquired_at: Option<DateTime<Utc>>,
    /// Release time.
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

impl ResourceConstraintInstance {
    /// Moves to `to`, validating the transition and maintaining timestamps.
    pub fn transition_to(&mut self, to: ConstraintState) -> Result<(), ExecutionError> {
        validate_constraint_transition(self.state, to)?;
        let now = Utc::now();
        match to {
            ConstraintState::Active => self.acquired_at = Some(now),
            ConstraintState::Finished => self.released_at = Some(now),
            ConstraintState::Blocked => {}
        }
        self.state = to;
        Ok(())
    }

    /// Queue ordering of two instances of the same unit under `strategy`.
    pub fn queue_cmp(&self, other: &Self, strategy: AcquireStrategy) -> Ordering {
        match strategy {
            AcquireStrategy::Fifo => self.order.cmp(&other.order),
            AcquireStrategy::Priority => other
                .priority
                .cmp(&self.priority)
                .then(self.order.cmp(&other.order)),
        }
    }
}
