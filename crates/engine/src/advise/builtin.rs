//! Built-in advisers.
//!
//! | Type | Applies when | Advice |
//! |---|---|---|
//! | `ON_SUCCESS` | status is SUCCEEDED | `NextStep` |
//! | `NEXT_STEP` | status is SUCCEEDED or SKIPPED | `NextStep` |
//! | `ON_FAIL` | failure matches | `NextStep` |
//! | `IGNORE` | failure matches | `MarkSuccess` |
//! | `RETRY` | failure matches | `Retry`, then `on_retry_failure` |
//! | `MANUAL_INTERVENTION` | failure matches | `InterventionWait` |
//! | `ABORT` / `PAUSE` / `RESUME` | failure matches, or status listed | `Interrupt` |
//!
//! "Failure matches" means a FAILED, ERRORED or EXPIRED status whose failure
//! types intersect `applicable_failure_types`; an empty set matches all.

use std::collections::BTreeSet;

use serde::Deserialize;
use stratus_core::{PlanNodeId, Status};
use stratus_execution::{FailureType, InterruptType};
use stratus_plan::AdviserObtainment;

use super::{Adviser, AdviserResponse, AdvisingEvent, Backoff};
use crate::error::EngineError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NextNode {
    next_node_id: Option<PlanNodeId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FailureGate {
    applicable_failure_types: BTreeSet<FailureType>,
    next_node_id: Option<PlanNodeId>,
}

/// Advances when the step SUCCEEDED.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnSuccessAdviser;

impl Adviser for OnSuccessAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        Ok(event.status() == Status::Succeeded)
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        let params: NextNode = event.parameters("ON_SUCCESS")?;
        Ok(AdviserResponse::NextStep {
            next_node_id: params.next_node_id,
        })
    }
}

/// Advances on any positive status, so skipped nodes move on too.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextStepAdviser;

impl Adviser for NextStepAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        Ok(event.status().is_positive())
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        let params: NextNode = event.parameters("NEXT_STEP")?;
        Ok(AdviserResponse::NextStep {
            next_node_id: params.next_node_id,
        })
    }
}

/// Keeps the failure and advances anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnFailAdviser;

impl Adviser for OnFailAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        let gate: FailureGate = event.parameters("ON_FAIL")?;
        Ok(event.failure_matches(&gate.applicable_failure_types))
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        let gate: FailureGate = event.parameters("ON_FAIL")?;
        Ok(AdviserResponse::NextStep {
            next_node_id: gate.next_node_id,
        })
    }
}

/// Turns a matching failure into SUCCEEDED.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreAdviser;

impl Adviser for IgnoreAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        let gate: FailureGate = event.parameters("IGNORE")?;
        Ok(event.failure_matches(&gate.applicable_failure_types))
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        let gate: FailureGate = event.parameters("IGNORE")?;
        Ok(AdviserResponse::MarkSuccess {
            next_node_id: gate.next_node_id,
        })
    }
}

/// Parameters of the `RETRY` adviser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryParameters {
    /// Retries allowed before `on_retry_failure` takes over.
    #[serde(alias = "retry_count")]
    pub max_attempts: u32,
    /// Wait between attempts.
    #[serde(default)]
    pub backoff: Backoff,
    /// Failure types worth retrying; empty retries every failure.
    #[serde(default)]
    pub applicable_failure_types: BTreeSet<FailureType>,
    /// Adviser consulted once the attempts are used up.
    pub on_retry_failure: AdviserObtainment,
}

/// Retries a failed node up to `max_attempts` times.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAdviser;

impl Adviser for RetryAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        let params: RetryParameters = event.parameters("RETRY")?;
        Ok(event.failure_matches(&params.applicable_failure_types))
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        let params: RetryParameters = event.parameters("RETRY")?;
        Ok(AdviserResponse::Retry {
            wait: params.backoff.delay(event.retry_count),
        })
    }

    fn fallback(&self, event: &AdvisingEvent<'_>) -> Result<Option<AdviserObtainment>, EngineError> {
        let params: RetryParameters = event.parameters("RETRY")?;
        if event.retry_count >= params.max_attempts {
            return Ok(Some(params.on_retry_failure));
        }
        Ok(None)
    }
}

/// Parks the node until an operator sends MARK_FAILED, IGNORE or ABORT.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualInterventionAdviser;

impl Adviser for ManualInterventionAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        let gate: FailureGate = event.parameters("MANUAL_INTERVENTION")?;
        Ok(event.failure_matches(&gate.applicable_failure_types))
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        let gate: FailureGate = event.parameters("MANUAL_INTERVENTION")?;
        Ok(AdviserResponse::InterventionWait {
            next_node_id: gate.next_node_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InterruptGate {
    applicable_failure_types: BTreeSet<FailureType>,
    statuses: Vec<Status>,
}

/// Hands the node to the interrupt processor.
///
/// With `statuses` set, applies when the raw status is listed; otherwise
/// applies to matching failures.
#[derive(Debug, Clone, Copy)]
pub struct InterruptAdviser {
    interrupt_type: InterruptType,
}

impl InterruptAdviser {
    /// An adviser raising `interrupt_type`.
    #[must_use]
    pub fn new(interrupt_type: InterruptType) -> Self {
        Self { interrupt_type }
    }

    fn component(&self) -> String {
        self.interrupt_type.to_string()
    }
}

impl Adviser for InterruptAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError> {
        let gate: InterruptGate = event.parameters(&self.component())?;
        if !gate.statuses.is_empty() {
            return Ok(gate.statuses.contains(&event.status()));
        }
        Ok(event.failure_matches(&gate.applicable_failure_types))
    }

    fn on_advise_event(&self, _event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError> {
        Ok(AdviserResponse::Interrupt {
            interrupt_type: self.interrupt_type,
        })
    }
}
