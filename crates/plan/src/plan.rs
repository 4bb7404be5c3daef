//! The immutable plan aggregate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stratus_core::{PlanId, PlanNodeId};

use crate::node::PlanNode;

/// An immutable, indexed set of plan nodes with a designated start node.
///
/// Plans are append-only once handed to the engine: nodes are looked up by
/// id but never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PlanDocument", into = "PlanDocument")]
pub struct Plan {
    uuid: PlanId,
    start_node_id: PlanNodeId,
    nodes: Vec<PlanNode>,
    index: HashMap<PlanNodeId, usize>,
}

/// Serialized form of a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanDocument {
    uuid: PlanId,
    start_node_id: PlanNodeId,
    nodes: Vec<PlanNode>,
}

impl From<PlanDocument> for Plan {
    fn from(document: PlanDocument) -> Self {
        Self::new(document.uuid, document.start_node_id, document.nodes)
    }
}

impl From<Plan> for PlanDocument {
    fn from(plan: Plan) -> Self {
        Self {
            uuid: plan.uuid,
            start_node_id: plan.start_node_id,
            nodes: plan.nodes,
        }
    }
}

impl Plan {
    /// Creates a plan without validating it. See [`crate::validate_plan`].
    ///
    /// When ids are duplicated, lookups resolve to the first occurrence.
    pub fn new(uuid: PlanId, start_node_id: PlanNodeId, nodes: Vec<PlanNode>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            index.entry(node.uuid).or_insert(position);
        }
        Self {
            uuid,
            start_node_id,
            nodes,
            index,
        }
    }

    /// Plan id.
    pub fn uuid(&self) -> PlanId {
        self.uuid
    }

    /// Node the plan starts with.
    pub fn start_node_id(&self) -> PlanNodeId {
        self.start_node_id
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Looks up a node by id.
    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.index.get(&id).map(|&position| &self.nodes[position])
    }

    /// Looks up a node by identifier.
    pub fn node_by_identifier(&self, identifier: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| node.identifier == identifier)
    }

    /// The start node, if present.
    pub fn start_node(&self) -> Option<&PlanNode> {
        self.node(self.start_node_id)
    }

    /// Returns `true` if the plan contains `id`.
    pub fn contains(&self, id: PlanNodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the plan has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
