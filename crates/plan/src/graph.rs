//! Next-step graph built on `petgraph`.
//!
//! Edges come from adviser obtainments: node `a` has an edge to `b` when one
//! of `a`'s advisers may route to `b`. Child nodes spawned at runtime are not
//! part of this graph.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use stratus_core::PlanNodeId;

use crate::error::PlanError;
use crate::plan::Plan;

/// Directed graph of possible node-to-node advances.
#[derive(Debug)]
pub struct PlanGraph {
    graph: DiGraph<PlanNodeId, ()>,
    index_map: HashMap<PlanNodeId, NodeIndex>,
}

impl PlanGraph {
    /// Builds the graph of a plan.
    ///
    /// Returns an error if an adviser references an unknown node or the node
    /// itself.
    pub fn from_plan(plan: &Plan) -> Result<Self, PlanError> {
        let mut graph = DiGraph::new();
        let mut index_map = HashMap::new();

        for node in plan.nodes() {
            index_map
                .entry(node.uuid)
                .or_insert_with(|| graph.add_node(node.uuid));
        }

        for node in plan.nodes() {
            let from_idx = index_map[&node.uuid];
            for next_node_id in node.next_node_ids() {
                if next_node_id == node.uuid {
                    return Err(PlanError::SelfLoop(node.uuid));
                }
                let to_idx = index_map
                    .get(&next_node_id)
                    .ok_or(PlanError::UnknownNextNode {
                        node_id: node.uuid,
                        next_node_id,
                    })?;
                graph.update_edge(from_idx, *to_idx, ());
            }
        }

        Ok(Self { graph, index_map })
    }

    /// Returns `true` if the graph contains at least one cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        algo::is_cyclic_directed(&self.graph)
    }

    /// Topological order. Returns an error if a cycle exists.
    pub fn topological_sort(&self) -> Result<Vec<PlanNodeId>, PlanError> {
        let sorted = algo::toposort(&self.graph, None).map_err(|_| PlanError::CycleDetected)?;
        Ok(sorted.into_iter().map(|idx| self.graph[idx]).collect())
    }

    /// Nodes an adviser on `id` may route to.
    #[must_use]
    pub fn successors(&self, id: PlanNodeId) -> Vec<PlanNodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Nodes whose advisers may route to `id`.
    #[must_use]
    pub fn predecessors(&self, id: PlanNodeId) -> Vec<PlanNodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Every node reachable from `start` through advances, `start` included.
    #[must_use]
    pub fn reachable_from(&self, start: PlanNodeId) -> Vec<PlanNodeId> {
        let Some(&idx) = self.index_map.get(&start) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, idx);
        let mut reachable = Vec::new();
        while let Some(next) = dfs.next(&self.graph) {
            reachable.push(self.graph[next]);
        }
        reachable
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct advance edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn neighbors(&self, id: PlanNodeId, direction: Direction) -> Vec<PlanNodeId> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .collect()
    }
}
