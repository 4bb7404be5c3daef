#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Engine
//!
//! The orchestration driver for Stratus plans.
//!
//! The engine walks a [`Plan`](stratus_plan::Plan) node by node. For each
//! node it picks an execution mode, hands the node to its registered step,
//! consults the adviser chain once the step answers, and starts whatever
//! comes next. It does NOT run step logic itself.
//!
//! - [`OrchestrationEngine`]: the public surface, built with
//!   [`OrchestrationEngine::builder`]
//! - [`AdviserRegistry`] and the built-in advisers: what happens after a step
//! - [`FacilitatorRegistry`]: which execution mode a node runs in
//! - [`TimeoutTracker`]s: deadlines that expire nodes
//! - [`ResourceConstraintEngine`] and the `RESOURCE_RESTRAINT` step:
//!   capacity-limited resource units
//! - [`InterruptRequest`]: ABORT, PAUSE, RESUME, RETRY, CUSTOM_FAILURE,
//!   MARK_FAILED and IGNORE
//!
//! Every mutation of one node execution is serialized behind a per-id lock,
//! so callbacks, timeouts and interrupts can arrive from any task.

pub mod advise;
mod callback;
pub mod config;
pub mod constraint;
mod driver;
pub mod engine;
pub mod error;
pub mod facilitate;
pub mod interrupt;
mod lock;
mod signal;
pub mod timeout;

pub use advise::{
    Adviser, AdviserRegistry, AdviserResponse, AdvisingEvent, Backoff, RetryParameters,
};
pub use config::EngineConfig;
pub use constraint::{
    AcquireRequest, RESOURCE_RESTRAINT, ResourceConstraintEngine, ResourceRestraintStep,
};
pub use engine::{OrchestrationEngine, OrchestrationEngineBuilder};
pub use error::EngineError;
pub use facilitate::{Facilitator, FacilitatorRegistry, FacilitatorResponse, ModeFacilitator};
pub use interrupt::InterruptRequest;
pub use timeout::{AbsoluteTimeoutTracker, ActiveTimeoutTracker, TimeoutSpec, TimeoutTracker};
