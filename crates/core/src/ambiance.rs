//! Execution context carried through every engine operation.
//!
//! An [`Ambiance`] records the plan execution, the plan, scoping
//! abstractions (account, org, project) and the stack of [`Level`]s from
//! the root node down to the node currently executing. Ambiances are values:
//! every helper returns a new ambiance and leaves the receiver untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId};

/// Setup abstraction key for the account identifier.
pub const ACCOUNT_ID: &str = "accountId";
/// Setup abstraction key for the organisation identifier.
pub const ORG_IDENTIFIER: &str = "orgIdentifier";
/// Setup abstraction key for the project identifier.
pub const PROJECT_IDENTIFIER: &str = "projectIdentifier";

/// Coarse classification of a step, used for stage lookups and FQNs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    /// The pipeline root.
    Pipeline,
    /// Container of stages.
    Stages,
    /// A single stage.
    Stage,
    /// A group of steps.
    StepGroup,
    /// A leaf step.
    Step,
    /// Parallel fan-out.
    Fork,
    /// Structural section such as an execution block.
    Section,
    /// Looping or matrix strategy.
    Strategy,
}

/// Type of the step a node runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepType {
    /// Registered step type name, e.g. `"SHELL_SCRIPT"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Category of the step.
    pub category: StepCategory,
}

impl StepType {
    /// Creates a step type.
    pub fn new(type_name: impl Into<String>, category: StepCategory) -> Self {
        Self {
            type_name: type_name.into(),
            category,
        }
    }

    /// Shorthand for a leaf [`StepCategory::Step`].
    pub fn step(type_name: impl Into<String>) -> Self {
        Self::new(type_name, StepCategory::Step)
    }
}

/// One entry in the ambiance stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Node execution occupying this level.
    pub runtime_id: NodeExecutionId,
    /// Plan node the execution was created from.
    pub setup_id: PlanNodeId,
    /// Plan node identifier, used to build fully-qualified names.
    pub identifier: String,
    /// Step type of the plan node.
    pub step_type: StepType,
    /// How many times this node has been retried.
    pub retry_index: u32,
}

impl Level {
    /// Creates a level with retry index zero.
    pub fn new(
        runtime_id: NodeExecutionId,
        setup_id: PlanNodeId,
        identifier: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            runtime_id,
            setup_id,
            identifier: identifier.into(),
            step_type,
            retry_index: 0,
        }
    }

    /// Sets the retry index.
    pub fn with_retry_index(mut self, retry_index: u32) -> Self {
        self.retry_index = retry_index;
        self
    }
}

/// Immutable execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    plan_execution_id: PlanExecutionId,
    plan_id: PlanId,
    #[serde(default)]
    setup_abstractions: BTreeMap<String, String>,
    #[serde(default)]
    levels: Vec<Level>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl Ambiance {
    /// Creates a root ambiance with no levels.
    pub fn new(plan_execution_id: PlanExecutionId, plan_id: PlanId) -> Self {
        Self {
            plan_execution_id,
            plan_id,
            setup_abstractions: BTreeMap::new(),
            levels: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a setup abstraction such as [`ACCOUNT_ID`].
    pub fn with_setup_abstraction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setup_abstractions.insert(key.into(), value.into());
        self
    }

    /// Replaces all setup abstractions.
    pub fn with_setup_abstractions(mut self, abstractions: BTreeMap<String, String>) -> Self {
        self.setup_abstractions = abstractions;
        self
    }

    /// Adds a free-form metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Plan execution this ambiance belongs to.
    pub fn plan_execution_id(&self) -> PlanExecutionId {
        self.plan_execution_id
    }

    /// Plan being executed.
    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    /// Levels from root to current.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Setup abstractions.
    pub fn setup_abstractions(&self) -> &BTreeMap<String, String> {
        &self.setup_abstractions
    }

    /// Metadata entries.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Account scoping, if set.
    pub fn account_id(&self) -> Option<&str> {
        self.setup_abstractions.get(ACCOUNT_ID).map(String::as_str)
    }

    /// Organisation scoping, if set.
    pub fn org_identifier(&self) -> Option<&str> {
        self.setup_abstractions.get(ORG_IDENTIFIER).map(String::as_str)
    }

    /// Project scoping, if set.
    pub fn project_identifier(&self) -> Option<&str> {
        self.setup_abstractions
            .get(PROJECT_IDENTIFIER)
            .map(String::as_str)
    }

    /// Innermost level.
    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Runtime id of the innermost level.
    pub fn current_runtime_id(&self) -> Option<NodeExecutionId> {
        self.current_level().map(|level| level.runtime_id)
    }

    /// Setup id of the innermost level.
    pub fn current_setup_id(&self) -> Option<PlanNodeId> {
        self.current_level().map(|level| level.setup_id)
    }

    /// Step type of the innermost level.
    pub fn current_step_type(&self) -> Option<&StepType> {
        self.current_level().map(|level| &level.step_type)
    }

    /// Runtime id of the level just above the innermost one.
    pub fn parent_runtime_id(&self) -> Option<NodeExecutionId> {
        self.levels
            .len()
            .checked_sub(2)
            .map(|index| self.levels[index].runtime_id)
    }

    /// Closest enclosing stage level.
    pub fn stage_level(&self) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|level| level.step_type.category == StepCategory::Stage)
    }

    /// Dot-separated identifiers of every non-fork level.
    pub fn fqn(&self) -> String {
        self.levels
            .iter()
            .filter(|level| level.step_type.category != StepCategory::Fork)
            .map(|level| level.identifier.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns a copy with `level` pushed as the innermost level.
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.push(level);
        ambiance
    }

    /// Returns a copy with the innermost level removed.
    pub fn clone_for_finish(&self) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.pop();
        ambiance
    }

    /// Returns a copy keeping only the first `levels_to_keep` levels.
    pub fn truncated(&self, levels_to_keep: usize) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.truncate(levels_to_keep);
        ambiance
    }
}
