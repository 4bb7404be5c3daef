//! The runtime record of one run of a plan.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{PlanExecutionId, PlanId, Status};

use crate::error::ExecutionError;
use crate::transition::validate_plan_transition;

/// One run of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    /// Unique id.
    pub uuid: PlanExecutionId,
    /// Plan being run.
    pub plan_id: PlanId,
    /// Current status.
    pub status: Status,
    /// Scoping passed at start.
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Optimistic concurrency version.
    #[serde(default)]
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// End time of the latest conclusion.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl PlanExecution {
    /// Creates a queued plan execution.
    pub fn new(uuid: PlanExecutionId, plan_id: PlanId) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            plan_id,
            status: Status::Queued,
            setup_abstractions: BTreeMap::new(),
            version: 0,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Sets the scoping.
    pub fn with_setup_abstractions(mut self, setup_abstractions: BTreeMap<String, String>) -> Self {
        self.setup_abstractions = setup_abstractions;
        self
    }

    /// Moves to `to`, validating the transition.
    pub fn transition_to(&mut self, to: Status) -> Result<(), ExecutionError> {
        validate_plan_transition(self.status, to)?;
        let now = Utc::now();
        if to == Status::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Puts an ended plan back into `Running` so a retried node can run.
    pub fn reopen(&mut self) -> Result<(), ExecutionError> {
        if !self.status.is_terminal() {
            return Err(ExecutionError::invalid_status_transition(
                self.status,
                Status::Running,
            ));
        }
        self.status = Status::Running;
        self.ended_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }
}
