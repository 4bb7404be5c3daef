#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Core
//!
//! Core types shared by every Stratus crate.
//!
//! ## Key Components
//!
//! - **Identifiers**: PlanId, PlanNodeId, PlanExecutionId, NodeExecutionId,
//!   InterruptId, TimeoutInstanceId, ResourceRestraintId,
//!   ResourceConstraintInstanceId
//! - **Status**: the lifecycle status shared by node and plan executions
//! - **Ambiance**: the immutable execution context and its level stack
//!
//! ## Usage
//!
//! ```rust
//! use stratus_core::{Ambiance, Level, NodeExecutionId, PlanExecutionId, PlanId, PlanNodeId, StepType};
//!
//! let root = Ambiance::new(PlanExecutionId::new(), PlanId::new());
//! let level = Level::new(NodeExecutionId::new(), PlanNodeId::new(), "build", StepType::step("SHELL"));
//! let child = root.clone_for_child(level);
//! assert_eq!(child.fqn(), "build");
//! ```

pub mod ambiance;
pub mod id;
pub mod status;

pub use ambiance::{
    ACCOUNT_ID, Ambiance, Level, ORG_IDENTIFIER, PROJECT_IDENTIFIER, StepCategory, StepType,
};
pub use id::*;
pub use status::Status;
