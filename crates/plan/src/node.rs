//! Plan node definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_core::{PlanNodeId, Status, StepType};

use crate::keys::FacilitatorType;
use crate::obtainment::{AdviserObtainment, FacilitatorObtainment, TimeoutObtainment};

/// Declared data dependency on another node's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefObject {
    /// Name under which the value is handed to the step.
    pub name: String,
    /// Plan node that produces the value.
    pub producer_id: PlanNodeId,
    /// Outcome key on the producer's step response.
    pub key: String,
}

impl RefObject {
    /// Creates a ref object.
    pub fn new(name: impl Into<String>, producer_id: PlanNodeId, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer_id,
            key: key.into(),
        }
    }
}

/// Condition under which a node is skipped instead of executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipCondition {
    /// Always skip.
    Always,
    /// Skip when the previous node in the chain ended in one of `statuses`.
    PreviousStatusIn {
        /// Statuses that trigger the skip.
        statuses: Vec<Status>,
    },
}

/// Immutable description of one node in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique id within the plan.
    pub uuid: PlanNodeId,
    /// Human-facing identifier, used in fully-qualified names.
    pub identifier: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Type of the step this node runs.
    pub step_type: StepType,
    /// Opaque step parameters.
    #[serde(default)]
    pub step_parameters: Value,
    /// Facilitator selection.
    pub facilitator_obtainment: FacilitatorObtainment,
    /// Ordered adviser chain.
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    /// Timeouts armed when the node starts.
    #[serde(default)]
    pub timeout_obtainments: Vec<TimeoutObtainment>,
    /// Declared data dependencies.
    #[serde(default)]
    pub ref_objects: Vec<RefObject>,
    /// Optional skip condition.
    #[serde(default)]
    pub skip_condition: Option<SkipCondition>,
}

impl PlanNode {
    /// Creates a sync node with a fresh id and no advisers.
    pub fn new(identifier: impl Into<String>, step_type: StepType) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: PlanNodeId::new(),
            name: identifier.clone(),
            identifier,
            step_type,
            step_parameters: Value::Null,
            facilitator_obtainment: FacilitatorObtainment::new(FacilitatorType::SYNC),
            adviser_obtainments: Vec::new(),
            timeout_obtainments: Vec::new(),
            ref_objects: Vec::new(),
            skip_condition: None,
        }
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, uuid: PlanNodeId) -> Self {
        self.uuid = uuid;
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the step parameters.
    pub fn with_step_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    /// Sets the facilitator.
    pub fn with_facilitator(mut self, obtainment: FacilitatorObtainment) -> Self {
        self.facilitator_obtainment = obtainment;
        self
    }

    /// Appends an adviser to the chain.
    pub fn with_adviser(mut self, obtainment: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(obtainment);
        self
    }

    /// Appends a timeout.
    pub fn with_timeout(mut self, obtainment: TimeoutObtainment) -> Self {
        self.timeout_obtainments.push(obtainment);
        self
    }

    /// Declares a data dependency.
    pub fn with_ref_object(mut self, ref_object: RefObject) -> Self {
        self.ref_objects.push(ref_object);
        self
    }

    /// Sets the skip condition.
    pub fn with_skip_condition(mut self, condition: SkipCondition) -> Self {
        self.skip_condition = Some(condition);
        self
    }

    /// Every node this node's advisers may route to.
    pub fn next_node_ids(&self) -> Vec<PlanNodeId> {
        self.adviser_obtainments
            .iter()
            .flat_map(AdviserObtainment::next_node_ids)
            .collect()
    }
}
