//! Fluent builder for constructing and validating plans.

use stratus_core::{PlanId, PlanNodeId};

use crate::error::PlanError;
use crate::node::PlanNode;
use crate::plan::Plan;
use crate::validate::validate_plan;

/// Accumulates nodes, then validates and produces a [`Plan`].
///
/// The first node added becomes the start node unless [`start_at`](Self::start_at)
/// says otherwise.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    uuid: Option<PlanId>,
    start_node_id: Option<PlanNodeId>,
    nodes: Vec<PlanNode>,
}

impl PlanBuilder {
    /// Starts an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the auto-generated plan id.
    #[must_use]
    pub fn id(mut self, uuid: PlanId) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Adds a node.
    #[must_use]
    pub fn node(mut self, node: PlanNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds several nodes.
    #[must_use]
    pub fn nodes(mut self, nodes: impl IntoIterator<Item = PlanNode>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// Sets the start node.
    #[must_use]
    pub fn start_at(mut self, node_id: PlanNodeId) -> Self {
        self.start_node_id = Some(node_id);
        self
    }

    /// Validates and builds the plan, returning the first error found.
    pub fn build(self) -> Result<Plan, PlanError> {
        let start_node_id = self
            .start_node_id
            .or_else(|| self.nodes.first().map(|node| node.uuid))
            .ok_or(PlanError::NoNodes)?;
        let plan = Plan::new(self.uuid.unwrap_or_else(PlanId::new), start_node_id, self.nodes);
        match validate_plan(&plan).into_iter().next() {
            Some(error) => Err(error),
            None => Ok(plan),
        }
    }
}
