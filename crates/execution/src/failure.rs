//! Failure classification carried on step responses.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a step failure. Advisers gate on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    /// Unclassified.
    Unknown,
    /// The node ran past its timeout.
    Timeout,
    /// A network or connectivity problem.
    Connectivity,
    /// Credentials were rejected.
    Authentication,
    /// Credentials lacked a permission.
    Authorization,
    /// A verification step failed.
    Verification,
    /// The step's own logic failed.
    ApplicationError,
    /// A policy evaluation denied the step.
    PolicyEvaluation,
    /// An approval was rejected.
    ApprovalRejection,
    /// A resource constraint could not be acquired.
    ResourceUnavailable,
    /// The engine itself could not run the node.
    EngineFault,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Timeout => "TIMEOUT",
            Self::Connectivity => "CONNECTIVITY",
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::Verification => "VERIFICATION",
            Self::ApplicationError => "APPLICATION_ERROR",
            Self::PolicyEvaluation => "POLICY_EVALUATION",
            Self::ApprovalRejection => "APPROVAL_REJECTION",
            Self::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            Self::EngineFault => "ENGINE_FAULT",
        };
        f.write_str(name)
    }
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Human-readable message.
    pub error_message: String,
    /// Failure categories.
    #[serde(default)]
    pub failure_types: BTreeSet<FailureType>,
}

impl FailureInfo {
    /// Failure with a message and no categories.
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            failure_types: BTreeSet::new(),
        }
    }

    /// Adds a category.
    pub fn with_type(mut self, failure_type: FailureType) -> Self {
        self.failure_types.insert(failure_type);
        self
    }

    /// Failure raised by the engine itself.
    pub fn engine_fault(error_message: impl Into<String>) -> Self {
        Self::new(error_message).with_type(FailureType::EngineFault)
    }

    /// Failure raised by a timeout.
    pub fn timeout(error_message: impl Into<String>) -> Self {
        Self::new(error_message).with_type(FailureType::Timeout)
    }

    /// Returns `true` if any category of this failure is in `types`.
    ///
    /// An empty `types` set matches every failure.
    pub fn matches_any(&self, types: &BTreeSet<FailureType>) -> bool {
        types.is_empty() || !self.failure_types.is_disjoint(types)
    }
}
