//! Plan-specific error types.

use stratus_core::PlanNodeId;
use thiserror::Error;

/// Errors raised while building or validating a plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A plan must have at least one node.
    #[error("plan must have at least one node")]
    NoNodes,

    /// Two nodes share the same uuid.
    #[error("duplicate plan node id: {0}")]
    DuplicateNodeId(PlanNodeId),

    /// The start node is not part of the plan.
    #[error("start node {0} is not part of the plan")]
    UnknownStartNode(PlanNodeId),

    /// A node identifier is empty.
    #[error("plan node {0} has an empty identifier")]
    EmptyIdentifier(PlanNodeId),

    /// An adviser obtainment points at a node that does not exist.
    #[error("node {node_id} advises towards unknown node {next_node_id}")]
    UnknownNextNode {
        /// Node carrying the obtainment.
        node_id: PlanNodeId,
        /// Referenced node.
        next_node_id: PlanNodeId,
    },

    /// A node advises towards itself.
    #[error("self-loop detected on node: {0}")]
    SelfLoop(PlanNodeId),

    /// The next-step graph contains a cycle.
    #[error("cycle detected in plan graph")]
    CycleDetected,

    /// A ref object names a producer node that does not exist.
    #[error("node {node_id} references unknown producer node {producer_id}")]
    UnknownRefProducer {
        /// Node declaring the dependency.
        node_id: PlanNodeId,
        /// Referenced producer.
        producer_id: PlanNodeId,
    },

    /// Obtainment parameters could not be interpreted.
    #[error("invalid parameters on node {node_id}: {message}")]
    InvalidParameters {
        /// Node carrying the parameters.
        node_id: PlanNodeId,
        /// What went wrong.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(PlanError::NoNodes.to_string(), "plan must have at least one node");
        assert_eq!(PlanError::CycleDetected.to_string(), "cycle detected in plan graph");

        let node_id = PlanNodeId::new();
        let next_node_id = PlanNodeId::new();
        let err = PlanError::UnknownNextNode {
            node_id,
            next_node_id,
        };
        assert_eq!(
            err.to_string(),
            format!("node {node_id} advises towards unknown node {next_node_id}")
        );
    }
}
