//! Plan validation that collects all errors.

use std::collections::HashSet;

use crate::error::PlanError;
use crate::graph::PlanGraph;
use crate::plan::Plan;

/// Validates a plan and returns every issue found.
///
/// [`PlanBuilder::build`](crate::PlanBuilder::build) stops at the first
/// error; this function keeps going so all problems can be reported at once.
#[must_use]
pub fn validate_plan(plan: &Plan) -> Vec<PlanError> {
    let mut errors = Vec::new();

    if plan.is_empty() {
        errors.push(PlanError::NoNodes);
        return errors;
    }

    let mut seen_ids = HashSet::new();
    for node in plan.nodes() {
        if !seen_ids.insert(node.uuid) {
            errors.push(PlanError::DuplicateNodeId(node.uuid));
        }
        if node.identifier.trim().is_empty() {
            errors.push(PlanError::EmptyIdentifier(node.uuid));
        }
    }

    if !plan.contains(plan.start_node_id()) {
        errors.push(PlanError::UnknownStartNode(plan.start_node_id()));
    }

    for node in plan.nodes() {
        for ref_object in &node.ref_objects {
            if !seen_ids.contains(&ref_object.producer_id) {
                errors.push(PlanError::UnknownRefProducer {
                    node_id: node.uuid,
                    producer_id: ref_object.producer_id,
                });
            }
        }
        for obtainment in &node.timeout_obtainments {
            if !(obtainment.parameters.is_null() || obtainment.parameters.is_object()) {
                errors.push(PlanError::InvalidParameters {
                    node_id: node.uuid,
                    message: format!("timeout {} parameters must be an object", obtainment.tracker_type),
                });
            }
        }
    }

    // Reference and self-loop checks happen per edge so every offender is reported.
    for node in plan.nodes() {
        for next_node_id in node.next_node_ids() {
            if next_node_id == node.uuid {
                errors.push(PlanError::SelfLoop(node.uuid));
            } else if !seen_ids.contains(&next_node_id) {
                errors.push(PlanError::UnknownNextNode {
                    node_id: node.uuid,
                    next_node_id,
                });
            }
        }
    }

    if let Ok(graph) = PlanGraph::from_plan(plan)
        && graph.has_cycle()
    {
        errors.push(PlanError::CycleDetected);
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AdviserType;
    use crate::node::{PlanNode, RefObject};
    use crate::obtainment::{AdviserObtainment, TimeoutObtainment};
    use crate::keys::TimeoutTrackerType;
    use serde_json::json;
    use stratus_core::{PlanId, PlanNodeId, StepType};

    fn node(identifier: &str) -> PlanNode {
        PlanNode::new(identifier, StepType::step("NOOP"))
    }

    fn next(to: PlanNodeId) -> AdviserObtainment {
        AdviserObtainment::new(AdviserType::ON_SUCCESS)
            .with_parameters(json!({"next_node_id": to.to_string()}))
    }

    #[test]
    fn valid_plan_returns_empty() {
        let b = node("b");
        let a = node("a").with_adviser(next(b.uuid));
        let plan = Plan::new(PlanId::new(), a.uuid, vec![a, b]);
        let errors = validate_plan(&plan);
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn detects_no_nodes() {
        let plan = Plan::new(PlanId::new(), PlanNodeId::new(), vec![]);
        assert_eq!(validate_plan(&plan), vec![PlanError::NoNodes]);
    }

    #[test]
    fn detects_unknown_start_node() {
        let ghost = PlanNodeId::new();
        let plan = Plan::new(PlanId::new(), ghost, vec![node("a")]);
        assert!(validate_plan(&plan).contains(&PlanError::UnknownStartNode(ghost)));
    }

    #[test]
    fn collects_multiple_errors() {
        let ghost = PlanNodeId::new();
        let a = node("").with_adviser(next(ghost));
        let dup = node("dup").with_id(a.uuid);
        let plan = Plan::new(PlanId::new(), a.uuid, vec![a.clone(), dup]);
        let errors = validate_plan(&plan);
        assert!(errors.contains(&PlanError::DuplicateNodeId(a.uuid)));
        assert!(errors.contains(&PlanError::EmptyIdentifier(a.uuid)));
        assert!(errors.contains(&PlanError::UnknownNextNode {
            node_id: a.uuid,
            next_node_id: ghost
        }));
    }

    #[test]
    fn detects_unknown_ref_producer() {
        let ghost = PlanNodeId::new();
        let a = node("a").with_ref_object(RefObject::new("artifact", ghost, "path"));
        let plan = Plan::new(PlanId::new(), a.uuid, vec![a.clone()]);
        assert_eq!(
            validate_plan(&plan),
            vec![PlanError::UnknownRefProducer {
                node_id: a.uuid,
                producer_id: ghost
            }]
        );
    }

    #[test]
    fn detects_cycle() {
        let a = node("a");
        let b = node("b");
        let (a_id, b_id) = (a.uuid, b.uuid);
        let plan = Plan::new(
            PlanId::new(),
            a_id,
            vec![a.with_adviser(next(b_id)), b.with_adviser(next(a_id))],
        );
        assert_eq!(validate_plan(&plan), vec![PlanError::CycleDetected]);
    }

    #[test]
    fn detects_non_object_timeout_parameters() {
        let a = node("a").with_timeout(
            TimeoutObtainment::new(TimeoutTrackerType::ABSOLUTE).with_parameters(json!(42)),
        );
        let plan = Plan::new(PlanId::new(), a.uuid, vec![a]);
        let errors = validate_plan(&plan);
        assert!(matches!(errors.as_slice(), [PlanError::InvalidParameters { .. }]));
    }
}
