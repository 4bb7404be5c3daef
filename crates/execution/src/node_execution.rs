//! The runtime record of one attempt at running a plan node.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_core::{
    Ambiance, NodeExecutionId, PlanExecutionId, PlanNodeId, Status, TimeoutInstanceId,
};

use crate::error::ExecutionError;
use crate::response::{ChildOutcome, ExecutionMode, StepResponse};
use crate::transition::validate_node_transition;

/// Work a paused node postponed until it is resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredAction {
    /// The node has not been dispatched to its step yet.
    Dispatch,
    /// Everything the node waited on arrived while it was paused.
    Continue,
    /// The step answered while the node was paused; advisers still run.
    Respond {
        /// The postponed step response.
        response: StepResponse,
    },
    /// The adviser chain already decided the outcome.
    Conclude {
        /// Terminal status to conclude with.
        status: Status,
        /// Node to advance to afterwards.
        next_node_id: Option<PlanNodeId>,
    },
}

/// Mode-specific progress of a node that is waiting on something.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Correlation ids the node waits on.
    #[serde(default)]
    pub callback_ids: Vec<String>,
    /// Responses received so far, keyed by correlation id.
    #[serde(default)]
    pub responses: BTreeMap<String, Value>,
    /// Task chain or child chain state handed between links.
    #[serde(default)]
    pub pass_through: Option<Value>,
    /// The current chain link is the last one.
    #[serde(default)]
    pub chain_end: bool,
    /// Children that have not concluded yet.
    #[serde(default)]
    pub pending_children: Vec<NodeExecutionId>,
    /// Children not started yet because of a concurrency cap.
    #[serde(default)]
    pub queued_children: VecDeque<PlanNodeId>,
    /// Concurrency cap for children.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Concluded children, in conclusion order.
    #[serde(default)]
    pub child_outcomes: Vec<ChildOutcome>,
    /// Node to advance to when a manual intervention is ignored.
    #[serde(default)]
    pub intervention_next: Option<PlanNodeId>,
    /// Work postponed by a pause.
    #[serde(default)]
    pub deferred: Option<DeferredAction>,
}

impl ExecutionProgress {
    /// Returns `true` once every awaited callback has a response.
    pub fn callbacks_complete(&self) -> bool {
        self.callback_ids
            .iter()
            .all(|id| self.responses.contains_key(id))
    }

    /// Returns `true` once no child is running or queued.
    pub fn children_complete(&self) -> bool {
        self.pending_children.is_empty() && self.queued_children.is_empty()
    }

    /// Forgets the callbacks of the previous wait.
    pub fn reset_callbacks(&mut self) {
        self.callback_ids.clear();
        self.responses.clear();
    }
}

/// One attempt at running a plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Unique id of this attempt.
    pub uuid: NodeExecutionId,
    /// Plan node being run.
    pub node_id: PlanNodeId,
    /// Plan node identifier.
    pub identifier: String,
    /// Context including this node's own level.
    pub ambiance: Ambiance,
    /// Current status.
    pub status: Status,
    /// Mode chosen by the facilitator.
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Last step response processed.
    #[serde(default)]
    pub step_response: Option<StepResponse>,
    /// Node execution that spawned this one as a child.
    #[serde(default)]
    pub parent_id: Option<NodeExecutionId>,
    /// Node execution this one follows in a chain.
    #[serde(default)]
    pub previous_id: Option<NodeExecutionId>,
    /// Node execution started after this one concluded.
    #[serde(default)]
    pub next_id: Option<NodeExecutionId>,
    /// Earlier attempts of the same node, oldest first.
    #[serde(default)]
    pub retry_ids: Vec<NodeExecutionId>,
    /// Superseded by a retry.
    #[serde(default)]
    pub old_retry: bool,
    /// Timeouts armed for this attempt.
    #[serde(default)]
    pub timeout_instance_ids: Vec<TimeoutInstanceId>,
    /// Status this node was paused from.
    #[serde(default)]
    pub paused_from: Option<Status>,
    /// Mode-specific progress.
    #[serde(default)]
    pub progress: ExecutionProgress,
    /// Concluded.
    #[serde(default)]
    pub ended: bool,
    /// Optimistic concurrency version, bumped on every persisted update.
    #[serde(default)]
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First dispatch time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Conclusion time.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl NodeExecution {
    /// Creates a queued node execution.
    pub fn new(
        uuid: NodeExecutionId,
        node_id: PlanNodeId,
        identifier: impl Into<String>,
        ambiance: Ambiance,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            node_id,
            identifier: identifier.into(),
            ambiance,
            status: Status::Queued,
            mode: None,
            step_response: None,
            parent_id: None,
            previous_id: None,
            next_id: None,
            retry_ids: Vec::new(),
            old_retry: false,
            timeout_instance_ids: Vec::new(),
            paused_from: None,
            progress: ExecutionProgress::default(),
            ended: false,
            version: 0,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Sets the parent.
    pub fn with_parent(mut self, parent_id: Option<NodeExecutionId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Sets the previous node execution.
    pub fn with_previous(mut self, previous_id: Option<NodeExecutionId>) -> Self {
        self.previous_id = previous_id;
        self
    }

    /// Sets the retry chain.
    pub fn with_retry_ids(mut self, retry_ids: Vec<NodeExecutionId>) -> Self {
        self.retry_ids = retry_ids;
        self
    }

    /// Plan execution this node belongs to.
    pub fn plan_execution_id(&self) -> PlanExecutionId {
        self.ambiance.plan_execution_id()
    }

    /// Returns `true` once concluded.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `to`, validating the transition and maintaining timestamps.
    pub fn transition_to(&mut self, to: Status) -> Result<(), ExecutionError> {
        validate_node_transition(self.status, to)?;
        let now = Utc::now();
        if to == Status::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.ended = true;
            self.ended_at = Some(now);
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// What a parent records when this node concludes.
    pub fn child_outcome(&self) -> ChildOutcome {
        let response = self.step_response.as_ref();
        ChildOutcome {
            node_execution_id: self.uuid,
            node_id: self.node_id,
            status: self.status,
            failure_info: response.and_then(|r| r.failure_info.clone()),
            outcomes: response.map(|r| r.outcomes.clone()).unwrap_or_default(),
        }
    }

    /// Ids of the timeouts that should be cancelled on conclusion.
    ///
    /// Skipped nodes never arm timeouts.
    pub fn timeout_instance_ids(&self) -> &[TimeoutInstanceId] {
        if self.status == Status::Skipped {
            &[]
        } else {
            &self.timeout_instance_ids
        }
    }
}
