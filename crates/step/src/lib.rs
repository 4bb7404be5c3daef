#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Step
//!
//! The contract between the orchestration engine and the steps it runs.
//!
//! - Capability traits, one per execution mode: [`SyncExecutable`],
//!   [`AsyncExecutable`], [`TaskExecutable`], [`TaskChainExecutable`],
//!   [`ChildExecutable`], [`ChildrenExecutable`], [`ChildChainExecutable`]
//! - [`Executable`]: a registered step tagged with its capability
//! - [`StepRegistry`]: lookup by step type name
//! - [`StepContext`]: what a step sees when called

pub mod context;
pub mod error;
pub mod executable;
pub mod registry;

pub use context::StepContext;
pub use error::StepError;
pub use executable::{
    AsyncExecutable, AsyncExecutableResponse, ChildChainExecutable, ChildChainResponse,
    ChildExecutable, ChildExecutableResponse, ChildrenExecutable, ChildrenExecutableResponse,
    Executable, SyncExecutable, TaskChainExecutable, TaskChainResponse, TaskExecutable,
    TaskRequest,
};
pub use registry::StepRegistry;
