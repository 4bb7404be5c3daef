//! State machine transition validation for node, plan, interrupt and
//! resource constraint records.

use stratus_core::Status;

use crate::constraint::ConstraintState;
use crate::error::ExecutionError;
use crate::interrupt::InterruptState;

/// Returns `true` if a node execution may move from `from` to `to`.
///
/// Terminal statuses are final. Any non-terminal status may move to any
/// terminal one; the remaining pairs are listed explicitly.
#[must_use]
pub fn can_transition_node(from: Status, to: Status) -> bool {
    if from.is_terminal() || from == to {
        return false;
    }
    if to.is_terminal() {
        return true;
    }
    matches!(
        (from, to),
        (Status::Queued, Status::Running | Status::Paused | Status::Discontinuing)
            | (
                Status::Running,
                Status::AsyncWaiting
                    | Status::TaskWaiting
                    | Status::ChildWaiting
                    | Status::InterventionWaiting
                    | Status::Paused
                    | Status::Discontinuing
            )
            | (
                Status::AsyncWaiting | Status::TaskWaiting | Status::ChildWaiting,
                Status::Running
                    | Status::AsyncWaiting
                    | Status::TaskWaiting
                    | Status::ChildWaiting
                    | Status::InterventionWaiting
                    | Status::Paused
                    | Status::Discontinuing
            )
            | (
                Status::InterventionWaiting,
                Status::Paused | Status::Discontinuing
            )
            | (Status::Discontinuing, Status::InterventionWaiting)
            | (Status::Paused, Status::Resumed | Status::Discontinuing)
            | (
                Status::Resumed,
                Status::Running
                    | Status::AsyncWaiting
                    | Status::TaskWaiting
                    | Status::ChildWaiting
                    | Status::InterventionWaiting
                    | Status::Paused
                    | Status::Discontinuing
            )
    )
}

/// Validates a node transition.
pub fn validate_node_transition(from: Status, to: Status) -> Result<(), ExecutionError> {
    if can_transition_node(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_status_transition(from, to))
    }
}

/// Returns `true` if a plan execution may move from `from` to `to`.
#[must_use]
pub fn can_transition_plan(from: Status, to: Status) -> bool {
    if from.is_terminal() || from == to {
        return false;
    }
    matches!(
        (from, to),
        (Status::Queued, Status::Running)
            | (Status::Running, Status::Paused | Status::Discontinuing)
            | (Status::Paused, Status::Running | Status::Discontinuing)
    ) || (to.is_terminal() && from != Status::Queued)
}

/// Validates a plan transition.
pub fn validate_plan_transition(from: Status, to: Status) -> Result<(), ExecutionError> {
    if can_transition_plan(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_status_transition(from, to))
    }
}

/// Returns `true` if an interrupt may move from `from` to `to`.
///
/// Interrupt states only move forward.
#[must_use]
pub fn can_transition_interrupt(from: InterruptState, to: InterruptState) -> bool {
    matches!(
        (from, to),
        (
            InterruptState::Registered,
            InterruptState::Processing | InterruptState::ProcessedUnsuccessfully
        ) | (
            InterruptState::Processing,
            InterruptState::ProcessedSuccessfully | InterruptState::ProcessedUnsuccessfully
        )
    )
}

/// Validates an interrupt transition.
pub fn validate_interrupt_transition(
    from: InterruptState,
    to: InterruptState,
) -> Result<(), ExecutionError> {
    if can_transition_interrupt(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_interrupt_transition(from, to))
    }
}

/// Returns `true` if a resource constraint instance may move from `from` to `to`.
#[must_use]
pub fn can_transition_constraint(from: ConstraintState, to: ConstraintState) -> bool {
    matches!(
        (from, to),
        (
            ConstraintState::Blocked,
            ConstraintState::Active | ConstraintState::Finished
        ) | (ConstraintState::Active, ConstraintState::Finished)
    )
}

/// Validates a resource constraint transition.
pub fn validate_constraint_transition(
    from: ConstraintState,
    to: ConstraintState,
) -> Result<(), ExecutionError> {
    if can_transition_constraint(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_constraint_transition(from, to))
    }
}
