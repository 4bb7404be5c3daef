//! Engine error types.

use stratus_core::{
    InterruptId, NodeExecutionId, PlanExecutionId, PlanNodeId, ResourceRestraintId, Status,
};
use stratus_execution::{ExecutionError, ExecutionMode, InterruptType};
use stratus_plan::PlanError;
use stratus_ports::PortsError;

/// Errors from the engine layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The plan failed validation.
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// No plan is loaded for the plan execution.
    #[error("plan execution not found: {id}")]
    PlanExecutionNotFound {
        /// The missing plan execution.
        id: PlanExecutionId,
    },

    /// No node execution with this id exists.
    #[error("node execution not found: {id}")]
    NodeExecutionNotFound {
        /// The missing node execution.
        id: NodeExecutionId,
    },

    /// No interrupt with this id exists.
    #[error("interrupt not found: {id}")]
    InterruptNotFound {
        /// The missing interrupt.
        id: InterruptId,
    },

    /// The plan has no node with this id.
    #[error("plan node not found: {node_id}")]
    PlanNodeNotFound {
        /// The missing plan node.
        node_id: PlanNodeId,
    },

    /// No adviser is registered under this type.
    #[error("unknown adviser type: {adviser_type}")]
    UnknownAdviser {
        /// The adviser type that was looked up.
        adviser_type: String,
    },

    /// No facilitator is registered under this type.
    #[error("unknown facilitator type: {facilitator_type}")]
    UnknownFacilitator {
        /// The facilitator type that was looked up.
        facilitator_type: String,
    },

    /// No timeout tracker is registered under this type.
    #[error("unknown timeout tracker type: {tracker_type}")]
    UnknownTimeoutTracker {
        /// The tracker type that was looked up.
        tracker_type: String,
    },

    /// No step is registered under this type.
    #[error("unknown step type: {step_type}")]
    UnknownStep {
        /// The step type that was looked up.
        step_type: String,
    },

    /// The facilitator chose a mode the step does not implement.
    #[error("step {step_type} implements {actual} but the facilitator chose {expected}")]
    ModeMismatch {
        /// Step type.
        step_type: String,
        /// Mode chosen by the facilitator.
        expected: ExecutionMode,
        /// Mode the registered step implements.
        actual: ExecutionMode,
    },

    /// Obtainment parameters could not be interpreted.
    #[error("invalid parameters for {component}: {message}")]
    InvalidParameters {
        /// Adviser, facilitator or tracker type.
        component: String,
        /// Parser message.
        message: String,
    },

    /// A task step was dispatched without a task dispatcher.
    #[error("no task dispatcher configured")]
    MissingTaskDispatcher,

    /// Adviser fallbacks nested deeper than the configured limit.
    #[error("adviser fallback chain exceeded depth {depth}")]
    FallbackDepthExceeded {
        /// The configured limit.
        depth: usize,
    },

    /// A step or adviser produced a status that does not end a node.
    #[error("status {status} does not conclude a node")]
    NonTerminalStatus {
        /// The offending status.
        status: Status,
    },

    /// The node or plan does not accept new node executions.
    #[error("node execution {id} not admitted: {reason}")]
    NotAdmitted {
        /// The rejected node execution.
        id: NodeExecutionId,
        /// Why.
        reason: String,
    },

    /// The node execution already reached a terminal status.
    #[error("node execution {id} already concluded")]
    AlreadyConcluded {
        /// The concluded node execution.
        id: NodeExecutionId,
    },

    /// An interrupt request was rejected before registration.
    #[error("invalid {interrupt_type} interrupt: {reason}")]
    InvalidInterrupt {
        /// Interrupt type.
        interrupt_type: InterruptType,
        /// Why.
        reason: String,
    },

    /// An interrupt could not be applied in the target's current state.
    #[error("illegal {interrupt_type} interrupt: {reason}")]
    IllegalInterrupt {
        /// Interrupt type.
        interrupt_type: InterruptType,
        /// Why.
        reason: String,
    },

    /// No restraint with this id exists.
    #[error("resource restraint not found: {id}")]
    RestraintNotFound {
        /// The missing restraint.
        id: ResourceRestraintId,
    },

    /// A TRY_ONCE acquisition found the unit busy, or the request can never fit.
    #[error("resource unit {resource_unit} unavailable: {reason}")]
    ResourceUnavailable {
        /// The unit that was requested.
        resource_unit: String,
        /// Why.
        reason: String,
    },

    /// A record changed underneath a locked section.
    #[error("concurrent modification of {entity} {id}")]
    ConcurrentModification {
        /// Entity type.
        entity: &'static str,
        /// Entity id.
        id: String,
    },

    /// The engine builder was not given a required component.
    #[error("engine builder is missing {0}")]
    MissingComponent(&'static str),

    /// Error from a persistence port.
    #[error("storage error: {0}")]
    Ports(#[from] PortsError),

    /// Error from the execution state layer.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl EngineError {
    /// Convenience constructor for [`EngineError::InvalidParameters`].
    pub fn invalid_parameters(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`EngineError::IllegalInterrupt`].
    pub fn illegal_interrupt(interrupt_type: InterruptType, reason: impl Into<String>) -> Self {
        Self::IllegalInterrupt {
            interrupt_type,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`EngineError::InvalidInterrupt`].
    pub fn invalid_interrupt(interrupt_type: InterruptType, reason: impl Into<String>) -> Self {
        Self::InvalidInterrupt {
            interrupt_type,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`EngineError::NotAdmitted`].
    pub fn not_admitted(id: NodeExecutionId, reason: impl Into<String>) -> Self {
        Self::NotAdmitted {
            id,
            reason: reason.into(),
        }
    }

    /// Returns `true` for internal invariant violations.
    ///
    /// The driver turns these into a FAILED node carrying
    /// `FailureType::EngineFault` instead of returning them.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownAdviser { .. }
                | Self::UnknownFacilitator { .. }
                | Self::UnknownTimeoutTracker { .. }
                | Self::UnknownStep { .. }
                | Self::ModeMismatch { .. }
                | Self::InvalidParameters { .. }
                | Self::MissingTaskDispatcher
                | Self::FallbackDepthExceeded { .. }
                | Self::NonTerminalStatus { .. }
        )
    }
}
