//! Step registry for looking up executables by step type.

use dashmap::DashMap;

use crate::error::StepError;
use crate::executable::Executable;

/// Thread-safe registry of step executables.
///
/// Steps are registered by step type name (e.g. `"SHELL_SCRIPT"`) and
/// looked up when a node is dispatched.
///
/// # Examples
///
/// ```rust,ignore
/// use stratus_step::{Executable, StepRegistry};
///
/// let registry = StepRegistry::new();
/// registry.register("SHELL_SCRIPT", Executable::Sync(Arc::new(ShellScript)));
/// let step = registry.get("SHELL_SCRIPT")?;
/// ```
pub struct StepRegistry {
    steps: DashMap<String, Executable>,
}

impl StepRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: DashMap::new(),
        }
    }

    /// Register a step.
    ///
    /// If a step with the same type already exists, it is replaced.
    pub fn register(&self, step_type: impl Into<String>, executable: Executable) {
        let step_type = step_type.into();
        tracing::info!(step_type = %step_type, mode = %executable.mode(), "registered step");
        self.steps.insert(step_type, executable);
    }

    /// Look up a step by type.
    pub fn get(&self, step_type: &str) -> Result<Executable, StepError> {
        self.steps
            .get(step_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StepError::NotFound {
                step_type: step_type.to_owned(),
            })
    }

    /// Check if a step is registered for the given type.
    #[must_use]
    pub fn contains(&self, step_type: &str) -> bool {
        self.steps.contains_key(step_type)
    }

    /// Remove a step by type. Returns the removed step, if any.
    pub fn remove(&self, step_type: &str) -> Option<Executable> {
        self.steps.remove(step_type).map(|(_, v)| v)
    }

    /// Number of registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// List all registered step types.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.steps.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use stratus_execution::{ExecutionMode, StepResponse};

    use super::*;
    use crate::context::StepContext;
    use crate::executable::SyncExecutable;

    struct Echo;

    #[async_trait]
    impl SyncExecutable for Echo {
        async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse, StepError> {
            Ok(StepResponse::succeeded().with_outcome("echo", ctx.step_parameters.clone()))
        }
    }

    #[test]
    fn register_and_get() {
        let registry = StepRegistry::new();
        registry.register("ECHO", Executable::Sync(Arc::new(Echo)));

        assert!(registry.contains("ECHO"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("ECHO").unwrap().mode(), ExecutionMode::Sync);
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = StepRegistry::new();
        assert!(registry.is_empty());
        let err = registry.get("NOPE").unwrap_err();
        assert!(matches!(err, StepError::NotFound { ref step_type } if step_type == "NOPE"));
    }

    #[test]
    fn register_replaces() {
        let registry = StepRegistry::default();
        registry.register("ECHO", Executable::Sync(Arc::new(Echo)));
        registry.register("ECHO", Executable::Sync(Arc::new(Echo)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.keys(), vec!["ECHO".to_owned()]);
    }

    #[test]
    fn remove_returns_step() {
        let registry = StepRegistry::new();
        registry.register("ECHO", Executable::Sync(Arc::new(Echo)));
        assert!(registry.remove("ECHO").is_some());
        assert!(registry.remove("ECHO").is_none());
    }
}
