//! What a step sees when the engine calls it.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use stratus_core::{Ambiance, NodeExecutionId, PlanNodeId};

use crate::error::StepError;

/// Input handed to every step capability.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Context including the node's own level.
    pub ambiance: Ambiance,
    /// Node execution being run.
    pub node_execution_id: NodeExecutionId,
    /// Plan node being run.
    pub node_id: PlanNodeId,
    /// Opaque step parameters from the plan node.
    pub step_parameters: Value,
    /// Resolved data dependencies, keyed by ref object name.
    pub inputs: BTreeMap<String, Value>,
}

impl StepContext {
    /// Creates a context without inputs.
    pub fn new(
        ambiance: Ambiance,
        node_execution_id: NodeExecutionId,
        node_id: PlanNodeId,
        step_parameters: Value,
    ) -> Self {
        Self {
            ambiance,
            node_execution_id,
            node_id,
            step_parameters,
            inputs: BTreeMap::new(),
        }
    }

    /// Sets the resolved inputs.
    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Deserializes the step parameters.
    pub fn parameters<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let value = if self.step_parameters.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.step_parameters.clone()
        };
        serde_json::from_value(value).map_err(StepError::from)
    }

    /// A resolved input by name.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use stratus_core::{PlanExecutionId, PlanId};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Params {
        #[serde(default)]
        command: Option<String>,
    }

    fn context(step_parameters: Value) -> StepContext {
        StepContext::new(
            Ambiance::new(PlanExecutionId::new(), PlanId::new()),
            NodeExecutionId::new(),
            PlanNodeId::new(),
            step_parameters,
        )
    }

    #[test]
    fn null_parameters_deserialize_as_empty_object() {
        let params: Params = context(Value::Null).parameters().unwrap();
        assert_eq!(params, Params { command: None });
    }

    #[test]
    fn typed_parameters() {
        let params: Params = context(json!({"command": "make"})).parameters().unwrap();
        assert_eq!(params.command.as_deref(), Some("make"));
    }

    #[test]
    fn bad_parameters_are_invalid() {
        let err = context(json!({"command": 3})).parameters::<Params>().unwrap_err();
        assert!(matches!(err, StepError::InvalidParameters(_)));
    }

    #[test]
    fn inputs_lookup() {
        let ctx = context(Value::Null).with_inputs([("artifact".to_owned(), json!("a.tar"))].into());
        assert_eq!(ctx.input("artifact"), Some(&json!("a.tar")));
        assert!(ctx.input("missing").is_none());
    }
}
