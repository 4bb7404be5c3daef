//! Obtainments: a registry key plus opaque parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_core::PlanNodeId;

use crate::keys::{AdviserType, FacilitatorType, TimeoutTrackerType};

/// Parameter key every built-in adviser uses to name its successor node.
pub const NEXT_NODE_ID: &str = "next_node_id";

/// Selects the facilitator for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
    /// Facilitator key.
    #[serde(rename = "type")]
    pub facilitator_type: FacilitatorType,
    /// Facilitator parameters, interpreted by the facilitator only.
    #[serde(default)]
    pub parameters: Value,
}

impl FacilitatorObtainment {
    /// Obtainment without parameters.
    pub fn new(facilitator_type: FacilitatorType) -> Self {
        Self {
            facilitator_type,
            parameters: Value::Null,
        }
    }

    /// Sets the parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// One entry of a node's ordered adviser chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    /// Adviser key.
    #[serde(rename = "type")]
    pub adviser_type: AdviserType,
    /// Adviser parameters, interpreted by the adviser only.
    #[serde(default)]
    pub parameters: Value,
}

impl AdviserObtainment {
    /// Obtainment without parameters.
    pub fn new(adviser_type: AdviserType) -> Self {
        Self {
            adviser_type,
            parameters: Value::Null,
        }
    }

    /// Sets the parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Every `next_node_id` mentioned anywhere in the parameters.
    ///
    /// Nested obtainments (such as a retry fallback) are searched too, so
    /// the plan graph sees every node an adviser may route to.
    pub fn next_node_ids(&self) -> Vec<PlanNodeId> {
        let mut ids = Vec::new();
        collect_next_node_ids(&self.parameters, &mut ids);
        ids
    }
}

fn collect_next_node_ids(value: &Value, ids: &mut Vec<PlanNodeId>) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map {
                if key == NEXT_NODE_ID
                    && let Some(id) = entry.as_str().and_then(|raw| PlanNodeId::parse(raw).ok())
                {
                    ids.push(id);
                } else {
                    collect_next_node_ids(entry, ids);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_next_node_ids(item, ids);
            }
        }
        _ => {}
    }
}

/// Selects a timeout tracker for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutObtainment {
    /// Tracker key.
    #[serde(rename = "type")]
    pub tracker_type: TimeoutTrackerType,
    /// Tracker parameters, e.g. `{"timeout_ms": 5000}`.
    #[serde(default)]
    pub parameters: Value,
}

impl TimeoutObtainment {
    /// Obtainment without parameters.
    pub fn new(tracker_type: TimeoutTrackerType) -> Self {
        Self {
            tracker_type,
            parameters: Value::Null,
        }
    }

    /// Sets the parameters.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}
