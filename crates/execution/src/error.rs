//! Execution error types.

use stratus_core::Status;
use thiserror::Error;

use crate::constraint::ConstraintState;
use crate::interrupt::InterruptState;

/// Errors raised by execution records.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A status transition is not valid for the current status.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// A status that must be terminal was not.
    #[error("status {0} is not terminal")]
    NotTerminal(Status),

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Invalid node or plan status transition.
    pub fn invalid_status_transition(from: Status, to: Status) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Invalid interrupt state transition.
    pub fn invalid_interrupt_transition(from: InterruptState, to: InterruptState) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Invalid resource constraint state transition.
    pub fn invalid_constraint_transition(from: ConstraintState, to: ConstraintState) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = ExecutionError::invalid_status_transition(Status::Succeeded, Status::Running);
        assert_eq!(err.to_string(), "invalid transition from succeeded to running");
    }

    #[test]
    fn interrupt_transition_display() {
        let err = ExecutionError::invalid_interrupt_transition(
            InterruptState::ProcessedSuccessfully,
            InterruptState::Processing,
        );
        assert_eq!(
            err.to_string(),
            "invalid transition from processed_successfully to processing"
        );
    }

    #[test]
    fn not_terminal_display() {
        assert_eq!(
            ExecutionError::NotTerminal(Status::Running).to_string(),
            "status running is not terminal"
        );
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err = ExecutionError::from(serde_err);
        assert!(err.to_string().starts_with("serialization:"));
    }
}
