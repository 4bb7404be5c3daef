//! Step error types.

use stratus_execution::{FailureInfo, FailureType};
use thiserror::Error;

/// Errors a step can return.
///
/// The engine never propagates these: they become a failed
/// [`StepResponse`](stratus_execution::StepResponse) that runs through the
/// node's adviser chain.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step failed with a classified failure.
    #[error("{}", .0.error_message)]
    Failure(FailureInfo),

    /// The step parameters could not be interpreted.
    #[error("invalid step parameters: {0}")]
    InvalidParameters(String),

    /// No step is registered under the given type.
    #[error("step type not found: {step_type}")]
    NotFound {
        /// The step type that was looked up.
        step_type: String,
    },

    /// Any other step error.
    #[error("step error: {0}")]
    Internal(String),
}

impl StepError {
    /// Classified failure.
    pub fn failure(failure_info: FailureInfo) -> Self {
        Self::Failure(failure_info)
    }

    /// The failure info recorded on the failed step response.
    pub fn into_failure_info(self) -> FailureInfo {
        match self {
            Self::Failure(info) => info,
            other => FailureInfo::new(other.to_string()).with_type(FailureType::ApplicationError),
        }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParameters(err.to_string())
    }
}
