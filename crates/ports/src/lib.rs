#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Ports
//!
//! Backend interface traits (ports) for the Stratus orchestration engine.
//!
//! This crate defines the **port** traits that backend drivers implement.
//! It follows the Ports & Drivers (hexagonal) architecture pattern:
//!
//! - [`NodeExecutionRepo`] -- node executions with versioned and
//!   status-conditional updates
//! - [`PlanExecutionRepo`] -- plan executions
//! - [`InterruptRepo`] -- interrupts with atomic duplicate suppression
//! - [`ResourceConstraintRepo`] -- restraints and constraint instances
//! - [`TaskDispatcher`] -- external task executors
//!
//! All traits are `async_trait` and object-safe, suitable for use as
//! `Arc<dyn Trait>` behind dependency injection.

pub mod constraint;
pub mod error;
pub mod interrupt;
pub mod node_execution;
pub mod plan_execution;
pub mod task;

pub use constraint::ResourceConstraintRepo;
pub use error::PortsError;
pub use interrupt::InterruptRepo;
pub use node_execution::NodeExecutionRepo;
pub use plan_execution::PlanExecutionRepo;
pub use task::TaskDispatcher;
