#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Plan
//!
//! Immutable plan definitions for the Stratus orchestration engine.
//!
//! A [`Plan`] is a set of [`PlanNode`]s with a start node. Each node names
//! its step type, a facilitator, an ordered adviser chain and optional
//! timeouts through *obtainments*: a registry key plus opaque JSON
//! parameters that only the selected component interprets.
//!
//! - [`PlanBuilder`] assembles and validates plans.
//! - [`validate_plan`] reports every structural problem at once.
//! - [`PlanGraph`] exposes the adviser-driven advance graph (petgraph).

pub mod builder;
pub mod error;
pub mod graph;
pub mod keys;
pub mod node;
pub mod obtainment;
pub mod plan;
pub mod validate;

pub use builder::PlanBuilder;
pub use error::PlanError;
pub use graph::PlanGraph;
pub use keys::{AdviserType, FacilitatorType, TimeoutTrackerType};
pub use node::{PlanNode, RefObject, SkipCondition};
pub use obtainment::{AdviserObtainment, FacilitatorObtainment, NEXT_NODE_ID, TimeoutObtainment};
pub use plan::Plan;
pub use validate::validate_plan;
