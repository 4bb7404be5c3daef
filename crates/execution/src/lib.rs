#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Execution
//!
//! Runtime records for the Stratus orchestration engine.
//!
//! This crate models execution-time data. It does NOT contain the
//! orchestration driver. It defines:
//!
//! - [`NodeExecution`]: one attempt at running a plan node, with its
//!   mode-specific [`ExecutionProgress`]
//! - [`PlanExecution`]: one run of a plan
//! - [`StepResponse`], [`FailureInfo`], [`FailureType`]: step results as data
//! - [`Interrupt`]: out-of-band commands and their processing state
//! - [`ResourceRestraint`] and [`ResourceConstraintInstance`]: capacity claims
//! - [`CallbackKey`] and [`CallbackLedger`]: exactly-once callback delivery
//! - State machine transitions validated by the [`transition`] module

pub mod constraint;
pub mod error;
pub mod failure;
pub mod idempotency;
pub mod interrupt;
pub mod node_execution;
pub mod plan_execution;
pub mod response;
pub mod transition;

pub use constraint::{
    AcquireMode, AcquireStrategy, ConstraintState, HoldingScope, ResourceConstraintInstance,
    ResourceRestraint,
};
pub use error::ExecutionError;
pub use failure::{FailureInfo, FailureType};
pub use idempotency::{CallbackKey, CallbackLedger};
pub use interrupt::{
    CustomFailure, Interrupt, InterruptKey, InterruptState, InterruptType, IssuedBy,
};
pub use node_execution::{DeferredAction, ExecutionProgress, NodeExecution};
pub use plan_execution::PlanExecution;
pub use response::{ChildOutcome, ExecutionMode, StepResponse, aggregate_child_outcomes};
