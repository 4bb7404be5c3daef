//! Interrupt records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{InterruptId, NodeExecutionId, PlanExecutionId, Status, TimeoutInstanceId};

use crate::error::ExecutionError;
use crate::failure::FailureInfo;
use crate::transition::validate_interrupt_transition;

/// Kind of out-of-band command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    /// Tear down a node (or the plan) and mark it aborted.
    Abort,
    /// Suspend a node (or the plan).
    Pause,
    /// Continue a paused node (or the plan).
    Resume,
    /// Run a failed node again.
    Retry,
    /// Fail a node with a given status, e.g. on timeout.
    CustomFailure,
    /// Conclude a node as failed.
    MarkFailed,
    /// Treat a failure awaiting intervention as success.
    Ignore,
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Abort => "ABORT",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Retry => "RETRY",
            Self::CustomFailure => "CUSTOM_FAILURE",
            Self::MarkFailed => "MARK_FAILED",
            Self::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

/// Processing state of an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptState {
    /// Accepted, not yet picked up.
    Registered,
    /// Being applied.
    Processing,
    /// Applied.
    ProcessedSuccessfully,
    /// Could not be applied.
    ProcessedUnsuccessfully,
}

impl InterruptState {
    /// Returns `true` once processing has finished either way.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::ProcessedSuccessfully | Self::ProcessedUnsuccessfully
        )
    }
}

impl fmt::Display for InterruptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Processing => "processing",
            Self::ProcessedSuccessfully => "processed_successfully",
            Self::ProcessedUnsuccessfully => "processed_unsuccessfully",
        };
        f.write_str(name)
    }
}

/// Who raised an interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssuedBy {
    /// A person or API client.
    Manual {
        /// Caller identifier.
        identifier: String,
    },
    /// An adviser decision on a node.
    Adviser {
        /// Node whose adviser raised it.
        node_execution_id: NodeExecutionId,
    },
    /// A fired timeout.
    Timeout {
        /// Timeout that fired.
        timeout_instance_id: TimeoutInstanceId,
    },
    /// The engine itself.
    System {
        /// Why.
        reason: String,
    },
}

/// Target of a `CUSTOM_FAILURE` interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFailure {
    /// Terminal status to report to the adviser chain.
    pub status: Status,
    /// Failure to report.
    pub failure_info: FailureInfo,
}

impl CustomFailure {
    /// Expiry caused by a timeout.
    pub fn expired(error_message: impl Into<String>) -> Self {
        Self {
            status: Status::Expired,
            failure_info: FailureInfo::timeout(error_message),
        }
    }
}

/// An out-of-band command against a node or a whole plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Unique id.
    pub uuid: InterruptId,
    /// Kind.
    pub interrupt_type: InterruptType,
    /// Plan execution targeted.
    pub plan_execution_id: PlanExecutionId,
    /// Node targeted; `None` targets the whole plan execution.
    #[serde(default)]
    pub node_execution_id: Option<NodeExecutionId>,
    /// Processing state.
    pub state: InterruptState,
    /// Origin.
    pub issued_by: IssuedBy,
    /// Status and failure for `CUSTOM_FAILURE`.
    #[serde(default)]
    pub custom_failure: Option<CustomFailure>,
    /// Why processing failed.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Interrupt {
    /// Creates a registered interrupt.
    pub fn new(
        interrupt_type: InterruptType,
        plan_execution_id: PlanExecutionId,
        node_execution_id: Option<NodeExecutionId>,
        issued_by: IssuedBy,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: InterruptId::new(),
            interrupt_type,
            plan_execution_id,
            node_execution_id,
            state: InterruptState::Registered,
            issued_by,
            custom_failure: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches the custom failure target.
    pub fn with_custom_failure(mut self, custom_failure: CustomFailure) -> Self {
        self.custom_failure = Some(custom_failure);
        self
    }

    /// Key under which concurrent duplicates are suppressed.
    pub fn dedup_key(&self) -> InterruptKey {
        InterruptKey {
            plan_execution_id: self.plan_execution_id,
            node_execution_id: self.node_execution_id,
            interrupt_type: self.interrupt_type,
        }
    }

    /// Moves to `to`, validating the transition.
    pub fn transition_to(&mut self, to: InterruptState) -> Result<(), ExecutionError> {
        validate_interrupt_transition(self.state, to)?;
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Identity of an interrupt for duplicate suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterruptKey {
    /// Plan execution.
    pub plan_execution_id: PlanExecutionId,
    /// Node, if node-scoped.
    pub node_execution_id: Option<NodeExecutionId>,
    /// Kind.
    pub interrupt_type: InterruptType,
}
