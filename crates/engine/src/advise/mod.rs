//! Adviser resolution.
//!
//! A plan node lists adviser obtainments in order. After the step resolves,
//! the [`AdviserRegistry`] walks that list and the first adviser whose
//! [`Adviser::can_advise`] answers `true` decides what happens next. The
//! rest of the chain is never consulted. An empty chain, or a chain where
//! nobody matches, lets the raw step status stand.

mod backoff;
mod builtin;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stratus_core::{Ambiance, NodeExecutionId, PlanNodeId, Status};
use stratus_execution::{FailureInfo, FailureType, InterruptType, StepResponse};
use stratus_plan::{AdviserObtainment, AdviserType};

use crate::error::EngineError;

pub use backoff::Backoff;
pub use builtin::{
    IgnoreAdviser, InterruptAdviser, ManualInterventionAdviser, NextStepAdviser, OnFailAdviser,
    OnSuccessAdviser, RetryAdviser, RetryParameters,
};

/// What an adviser sees.
#[derive(Debug, Clone, Copy)]
pub struct AdvisingEvent<'a> {
    /// Ambiance of the node execution, including its own level.
    pub ambiance: &'a Ambiance,
    /// The node execution being advised.
    pub node_execution_id: NodeExecutionId,
    /// The step's terminal response.
    pub step_response: &'a StepResponse,
    /// Parameters of the obtainment being evaluated.
    pub parameters: &'a Value,
    /// How many times the node has already been retried.
    pub retry_count: u32,
}

impl AdvisingEvent<'_> {
    /// Raw status reported by the step.
    #[must_use]
    pub fn status(&self) -> Status {
        self.step_response.status
    }

    /// Failure details reported by the step, if any.
    #[must_use]
    pub fn failure_info(&self) -> Option<&FailureInfo> {
        self.step_response.failure_info.as_ref()
    }

    /// Deserializes the obtainment parameters. `null` reads as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidParameters`] tagged with `component`.
    pub fn parameters<T: DeserializeOwned>(&self, component: &str) -> Result<T, EngineError> {
        let value = if self.parameters.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.parameters.clone()
        };
        serde_json::from_value(value).map_err(|e| EngineError::invalid_parameters(component, e.to_string()))
    }

    /// Broke status whose failure types intersect `applicable`.
    ///
    /// An empty `applicable` set matches every failure, including one with
    /// no failure info.
    #[must_use]
    pub fn failure_matches(&self, applicable: &BTreeSet<FailureType>) -> bool {
        if !self.status().is_broke() {
            return false;
        }
        match self.failure_info() {
            Some(info) => info.matches_any(applicable),
            None => applicable.is_empty(),
        }
    }
}

/// The decision of one adviser. Exactly one variant per evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum AdviserResponse {
    /// Keep the raw status and start `next_node_id`, if any.
    NextStep {
        /// The node to start next.
        next_node_id: Option<PlanNodeId>,
    },
    /// Conclude as SUCCEEDED and start `next_node_id`, if any.
    MarkSuccess {
        /// The node to start next.
        next_node_id: Option<PlanNodeId>,
    },
    /// Conclude with `status` and stop.
    EndNode {
        /// A terminal status.
        status: Status,
    },
    /// Run the node again as a fresh node execution after `wait`.
    Retry {
        /// Delay before the new attempt starts.
        wait: Duration,
    },
    /// Park in INTERVENTION_WAITING until an operator decides.
    InterventionWait {
        /// Where IGNORE continues.
        next_node_id: Option<PlanNodeId>,
    },
    /// Hand control to the interrupt processor.
    Interrupt {
        /// ABORT, PAUSE or RESUME.
        interrupt_type: InterruptType,
    },
}

/// Policy deciding what happens after a step resolves.
pub trait Adviser: Send + Sync {
    /// Whether this adviser applies to `event`.
    ///
    /// # Errors
    ///
    /// Unreadable parameters.
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> Result<bool, EngineError>;

    /// Produces the advice. Only called after `can_advise` returned `true`.
    ///
    /// # Errors
    ///
    /// Unreadable parameters.
    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, EngineError>;

    /// Another obtainment that advises instead of this adviser.
    ///
    /// Consulted after `can_advise` and before `on_advise_event`.
    ///
    /// # Errors
    ///
    /// Unreadable parameters.
    fn fallback(&self, _event: &AdvisingEvent<'_>) -> Result<Option<AdviserObtainment>, EngineError> {
        Ok(None)
    }
}

/// Adviser implementations keyed by [`AdviserType`].
pub struct AdviserRegistry {
    advisers: DashMap<AdviserType, Arc<dyn Adviser>>,
    max_fallback_depth: usize,
}

impl AdviserRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new(max_fallback_depth: usize) -> Self {
        Self {
            advisers: DashMap::new(),
            max_fallback_depth,
        }
    }

    /// A registry holding every built-in adviser.
    #[must_use]
    pub fn with_builtins(max_fallback_depth: usize) -> Self {
        let registry = Self::new(max_fallback_depth);
        registry.register(AdviserType::ON_SUCCESS, Arc::new(OnSuccessAdviser));
        registry.register(AdviserType::NEXT_STEP, Arc::new(NextStepAdviser));
        registry.register(AdviserType::ON_FAIL, Arc::new(OnFailAdviser));
        registry.register(AdviserType::IGNORE, Arc::new(IgnoreAdviser));
        registry.register(AdviserType::RETRY, Arc::new(RetryAdviser));
        registry.register(
            AdviserType::MANUAL_INTERVENTION,
            Arc::new(ManualInterventionAdviser),
        );
        registry.register(
            AdviserType::ABORT,
            Arc::new(InterruptAdviser::new(InterruptType::Abort)),
        );
        registry.register(
            AdviserType::PAUSE,
            Arc::new(InterruptAdviser::new(InterruptType::Pause)),
        );
        registry.register(
            AdviserType::RESUME,
            Arc::new(InterruptAdviser::new(InterruptType::Resume)),
        );
        registry
    }

    /// Registers or replaces the adviser for `adviser_type`.
    pub fn register(&self, adviser_type: AdviserType, adviser: Arc<dyn Adviser>) {
        tracing::debug!(adviser_type = %adviser_type, "registered adviser");
        self.advisers.insert(adviser_type, adviser);
    }

    /// Looks up the adviser for `adviser_type`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownAdviser`].
    pub fn get(&self, adviser_type: &AdviserType) -> Result<Arc<dyn Adviser>, EngineError> {
        self.advisers
            .get(adviser_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownAdviser {
                adviser_type: adviser_type.to_string(),
            })
    }

    /// Walks `obtainments` in order; the first adviser that applies wins.
    ///
    /// `Ok(None)` means nobody applied and the raw status stands.
    ///
    /// # Errors
    ///
    /// Unknown adviser types, unreadable parameters and fallback chains
    /// deeper than the configured limit.
    pub fn resolve(
        &self,
        obtainments: &[AdviserObtainment],
        event: &AdvisingEvent<'_>,
    ) -> Result<Option<AdviserResponse>, EngineError> {
        for obtainment in obtainments {
            if let Some(response) = self.advise(obtainment, event, 0)? {
                tracing::debug!(
                    node_execution_id = %event.node_execution_id,
                    adviser_type = %obtainment.adviser_type,
                    advice = ?response,
                    "adviser matched"
                );
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    fn advise(
        &self,
        obtainment: &AdviserObtainment,
        event: &AdvisingEvent<'_>,
        depth: usize,
    ) -> Result<Option<AdviserResponse>, EngineError> {
        if depth > self.max_fallback_depth {
            return Err(EngineError::FallbackDepthExceeded {
                depth: self.max_fallback_depth,
            });
        }
        let adviser = self.get(&obtainment.adviser_type)?;
        let event = AdvisingEvent {
            parameters: &obtainment.parameters,
            ..*event
        };
        if !adviser.can_advise(&event)? {
            return Ok(None);
        }
        match adviser.fallback(&event)? {
            Some(fallback) => self.advise(&fallback, &event, depth + 1),
            None => adviser.on_advise_event(&event).map(Some),
        }
    }
}

impl std::fmt::Debug for AdviserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdviserRegistry")
            .field("advisers", &self.advisers.len())
            .field("max_fallback_depth", &self.max_fallback_depth)
            .finish()
    }
}
