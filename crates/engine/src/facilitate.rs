//! Facilitators choose how a node runs.
//!
//! The facilitator named by a plan node's obtainment returns the execution
//! mode and an optional initial wait. The node is RUNNING during the wait;
//! dispatch happens once it elapses.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use stratus_core::Ambiance;
use stratus_execution::ExecutionMode;
use stratus_plan::FacilitatorType;

use crate::error::EngineError;

/// What a facilitator decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilitatorResponse {
    /// Mode the step must implement.
    pub mode: ExecutionMode,
    /// Delay between RUNNING and dispatch.
    pub initial_wait: Duration,
}

impl FacilitatorResponse {
    /// Immediate dispatch in `mode`.
    #[must_use]
    pub fn immediate(mode: ExecutionMode) -> Self {
        Self {
            mode,
            initial_wait: Duration::ZERO,
        }
    }
}

/// Decides the execution mode of a node.
pub trait Facilitator: Send + Sync {
    /// Called once per node execution before dispatch.
    ///
    /// # Errors
    ///
    /// Unreadable parameters.
    fn facilitate(&self, ambiance: &Ambiance, parameters: &Value) -> Result<FacilitatorResponse, EngineError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModeParameters {
    initial_wait_ms: u64,
}

/// Built-in facilitator: a fixed mode plus `{"initial_wait_ms": n}`.
#[derive(Debug, Clone, Copy)]
pub struct ModeFacilitator {
    mode: ExecutionMode,
}

impl ModeFacilitator {
    /// A facilitator always choosing `mode`.
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

impl Facilitator for ModeFacilitator {
    fn facilitate(&self, _ambiance: &Ambiance, parameters: &Value) -> Result<FacilitatorResponse, EngineError> {
        let params: ModeParameters = if parameters.is_null() {
            ModeParameters::default()
        } else {
            serde_json::from_value(parameters.clone())
                .map_err(|e| EngineError::invalid_parameters(self.mode.to_string(), e.to_string()))?
        };
        Ok(FacilitatorResponse {
            mode: self.mode,
            initial_wait: Duration::from_millis(params.initial_wait_ms),
        })
    }
}

/// Facilitators keyed by [`FacilitatorType`].
pub struct FacilitatorRegistry {
    facilitators: DashMap<FacilitatorType, Arc<dyn Facilitator>>,
}

impl FacilitatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            facilitators: DashMap::new(),
        }
    }

    /// A registry with one [`ModeFacilitator`] per execution mode.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for (facilitator_type, mode) in [
            (FacilitatorType::SYNC, ExecutionMode::Sync),
            (FacilitatorType::ASYNC, ExecutionMode::Async),
            (FacilitatorType::TASK, ExecutionMode::Task),
            (FacilitatorType::TASK_CHAIN, ExecutionMode::TaskChain),
            (FacilitatorType::CHILD, ExecutionMode::Child),
            (FacilitatorType::CHILDREN, ExecutionMode::Children),
            (FacilitatorType::CHILD_CHAIN, ExecutionMode::ChildChain),
        ] {
            registry.register(facilitator_type, Arc::new(ModeFacilitator::new(mode)));
        }
        registry
    }

    /// Registers or replaces the facilitator for `facilitator_type`.
    pub fn register(&self, facilitator_type: FacilitatorType, facilitator: Arc<dyn Facilitator>) {
        self.facilitators.insert(facilitator_type, facilitator);
    }

    /// Runs the facilitator registered for `facilitator_type`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownFacilitator`] or the facilitator's own error.
    pub fn facilitate(
        &self,
        facilitator_type: &FacilitatorType,
        ambiance: &Ambiance,
        parameters: &Value,
    ) -> Result<FacilitatorResponse, EngineError> {
        let facilitator = self
            .facilitators
            .get(facilitator_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownFacilitator {
                facilitator_type: facilitator_type.to_string(),
            })?;
        facilitator.facilitate(ambiance, parameters)
    }
}

impl Default for FacilitatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for FacilitatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorRegistry")
            .field("facilitators", &self.facilitators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use stratus_core::{PlanExecutionId, PlanId};

    fn ambiance() -> Ambiance {
        Ambiance::new(PlanExecutionId::new(), PlanId::new())
    }

    #[rstest]
    #[case(FacilitatorType::SYNC, ExecutionMode::Sync)]
    #[case(FacilitatorType::TASK_CHAIN, ExecutionMode::TaskChain)]
    #[case(FacilitatorType::CHILDREN, ExecutionMode::Children)]
    fn builtins_map_to_modes(#[case] facilitator_type: FacilitatorType, #[case] mode: ExecutionMode) {
        let registry = FacilitatorRegistry::with_builtins();
        let response = registry
            .facilitate(&facilitator_type, &ambiance(), &Value::Null)
            .unwrap();
        assert_eq!(response, FacilitatorResponse::immediate(mode));
    }

    #[test]
    fn initial_wait_is_read_from_parameters() {
        let registry = FacilitatorRegistry::with_builtins();
        let response = registry
            .facilitate(&FacilitatorType::ASYNC, &ambiance(), &json!({"initial_wait_ms": 250}))
            .unwrap();
        assert_eq!(response.initial_wait, Duration::from_millis(250));
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let registry = FacilitatorRegistry::with_builtins();
        let err = registry
            .facilitate(&FacilitatorType::SYNC, &ambiance(), &json!({"initial_wait_ms": "soon"}))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters { .. }));
    }

    #[test]
    fn unknown_type_is_an_engine_fault() {
        let registry = FacilitatorRegistry::new();
        let err = registry
            .facilitate(&FacilitatorType::new("BARRIER"), &ambiance(), &Value::Null)
            .unwrap_err();
        assert!(err.is_engine_fault());
        assert_eq!(err.to_string(), "unknown facilitator type: BARRIER");
    }
}
