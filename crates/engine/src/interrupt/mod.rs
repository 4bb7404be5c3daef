//! Interrupt requests and processing.
//!
//! An interrupt is registered first and processed second. Registration is
//! deduplicated per `(plan execution, node execution, type)` while an equal
//! interrupt is still registered or processing. Processing claims the
//! interrupt with a REGISTERED -> PROCESSING compare-and-set, so two
//! concurrent processors never both apply it.

mod processor;

use stratus_core::{NodeExecutionId, PlanExecutionId, Status};
use stratus_execution::{CustomFailure, Interrupt, InterruptType, IssuedBy};

use crate::error::EngineError;

/// A request to interrupt a node or a whole plan execution.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptRequest {
    /// Kind of interrupt.
    pub interrupt_type: InterruptType,
    /// Plan execution targeted.
    pub plan_execution_id: PlanExecutionId,
    /// Node targeted; `None` targets every top-level node of the plan.
    pub node_execution_id: Option<NodeExecutionId>,
    /// Origin, recorded on the interrupt.
    pub issued_by: IssuedBy,
    /// Required for `CUSTOM_FAILURE`.
    pub custom_failure: Option<CustomFailure>,
}

impl InterruptRequest {
    /// A manual interrupt against one node execution.
    pub fn for_node(
        interrupt_type: InterruptType,
        plan_execution_id: PlanExecutionId,
        node_execution_id: NodeExecutionId,
    ) -> Self {
        Self {
            interrupt_type,
            plan_execution_id,
            node_execution_id: Some(node_execution_id),
            issued_by: IssuedBy::Manual {
                identifier: "api".into(),
            },
            custom_failure: None,
        }
    }

    /// A manual interrupt against a whole plan execution.
    pub fn for_plan(interrupt_type: InterruptType, plan_execution_id: PlanExecutionId) -> Self {
        Self {
            interrupt_type,
            plan_execution_id,
            node_execution_id: None,
            issued_by: IssuedBy::Manual {
                identifier: "api".into(),
            },
            custom_failure: None,
        }
    }

    /// Overrides the origin.
    pub fn issued_by(mut self, issued_by: IssuedBy) -> Self {
        self.issued_by = issued_by;
        self
    }

    /// Sets the status and failure of a `CUSTOM_FAILURE`.
    pub fn with_custom_failure(mut self, custom_failure: CustomFailure) -> Self {
        self.custom_failure = Some(custom_failure);
        self
    }

    /// Rejects requests that can never be applied.
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        let node_scoped = matches!(
            self.interrupt_type,
            InterruptType::Retry
                | InterruptType::CustomFailure
                | InterruptType::MarkFailed
                | InterruptType::Ignore
        );
        if node_scoped && self.node_execution_id.is_none() {
            return Err(EngineError::invalid_interrupt(
                self.interrupt_type,
                "a node execution id is required",
            ));
        }
        match (&self.custom_failure, self.interrupt_type) {
            (None, InterruptType::CustomFailure) => Err(EngineError::invalid_interrupt(
                self.interrupt_type,
                "custom failure details are required",
            )),
            (Some(failure), InterruptType::CustomFailure) if !failure.status.is_terminal() => {
                Err(EngineError::invalid_interrupt(
                    self.interrupt_type,
                    format!("status {} does not end a node", failure.status),
                ))
            }
            (Some(_), interrupt_type) if interrupt_type != InterruptType::CustomFailure => {
                Err(EngineError::invalid_interrupt(
                    interrupt_type,
                    "custom failure details only apply to CUSTOM_FAILURE",
                ))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn into_interrupt(self) -> Interrupt {
        let interrupt = Interrupt::new(
            self.interrupt_type,
            self.plan_execution_id,
            self.node_execution_id,
            self.issued_by,
        );
        match self.custom_failure {
            Some(custom_failure) => interrupt.with_custom_failure(custom_failure),
            None => interrupt,
        }
    }
}

/// How a PAUSE or RESUME affects a node in its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusPropagator {
    /// Suspend the node and its descendants.
    Pause,
    /// Restore the node and its descendants.
    Resume,
    /// Nothing to do.
    Noop,
}

impl StatusPropagator {
    pub(crate) fn select(interrupt_type: InterruptType, status: Status) -> Self {
        match interrupt_type {
            InterruptType::Pause if status.is_pausable() => Self::Pause,
            InterruptType::Resume if status == Status::Paused => Self::Resume,
            _ => Self::Noop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(InterruptType::Pause, Status::Running, StatusPropagator::Pause)]
    #[case(InterruptType::Pause, Status::AsyncWaiting, StatusPropagator::Pause)]
    #[case(InterruptType::Pause, Status::InterventionWaiting, StatusPropagator::Pause)]
    #[case(InterruptType::Pause, Status::Paused, StatusPropagator::Noop)]
    #[case(InterruptType::Pause, Status::Succeeded, StatusPropagator::Noop)]
    #[case(InterruptType::Resume, Status::Paused, StatusPropagator::Resume)]
    #[case(InterruptType::Resume, Status::Running, StatusPropagator::Noop)]
    #[case(InterruptType::Abort, Status::Running, StatusPropagator::Noop)]
    fn propagator_selection(
        #[case] interrupt_type: InterruptType,
        #[case] status: Status,
        #[case] expected: StatusPropagator,
    ) {
        assert_eq!(StatusPropagator::select(interrupt_type, status), expected);
    }

    #[test]
    fn node_scoped_types_need_a_node() {
        let pe = PlanExecutionId::new();
        for interrupt_type in [
            InterruptType::Retry,
            InterruptType::MarkFailed,
            InterruptType::Ignore,
        ] {
            let err = InterruptRequest::for_plan(interrupt_type, pe).validate().unwrap_err();
            assert!(matches!(err, EngineError::InvalidInterrupt { .. }));
        }
        assert!(InterruptRequest::for_plan(InterruptType::Abort, pe).validate().is_ok());
        assert!(InterruptRequest::for_plan(InterruptType::Pause, pe).validate().is_ok());
    }

    #[test]
    fn custom_failure_needs_terminal_details() {
        let pe = PlanExecutionId::new();
        let ne = NodeExecutionId::new();

        let bare = InterruptRequest::for_node(InterruptType::CustomFailure, pe, ne);
        assert!(bare.validate().is_err());

        let expired = bare.clone().with_custom_failure(CustomFailure::expired("too slow"));
        assert!(expired.validate().is_ok());

        let mut running = CustomFailure::expired("x");
        running.status = Status::Running;
        assert!(bare.with_custom_failure(running).validate().is_err());

        let stray = InterruptRequest::for_node(InterruptType::Abort, pe, ne)
            .with_custom_failure(CustomFailure::expired("x"));
        assert!(stray.validate().is_err());
    }

    #[test]
    fn into_interrupt_keeps_origin_and_failure() {
        let pe = PlanExecutionId::new();
        let ne = NodeExecutionId::new();
        let interrupt = InterruptRequest::for_node(InterruptType::CustomFailure, pe, ne)
            .issued_by(IssuedBy::System {
                reason: "test".into(),
            })
            .with_custom_failure(CustomFailure::expired("late"))
            .into_interrupt();

        assert_eq!(interrupt.node_execution_id, Some(ne));
        assert_eq!(
            interrupt.issued_by,
            IssuedBy::System {
                reason: "test".into()
            }
        );
        assert_eq!(interrupt.custom_failure.unwrap().status, Status::Expired);
    }
}
