//! Unique identifiers for Stratus entities.
//!
//! Every identifier is a [`domain-key`](https://crates.io/crates/domain-key)
//! `Uuid<D>` wrapper parameterized by its own domain marker, so a
//! [`NodeExecutionId`] can never be passed where a [`PlanNodeId`] is expected.
//!
//! All ID types are `Copy` and support:
//! - `new()` for random (v4) UUID generation
//! - `nil()` for the zero value
//! - `parse(&str)` for string parsing
//! - serde (serialized as the UUID string)
//! - `Display`, `Eq`, `Ord`, `Hash`

use domain_key::define_uuid;

// Re-export for downstream parse error handling
pub use domain_key::UuidParseError;

// Plan definitions
define_uuid!(pub PlanIdDomain => PlanId);
define_uuid!(pub PlanNodeIdDomain => PlanNodeId);

// Runtime records
define_uuid!(pub PlanExecutionIdDomain => PlanExecutionId);
define_uuid!(pub NodeExecutionIdDomain => NodeExecutionId);
define_uuid!(pub InterruptIdDomain => InterruptId);
define_uuid!(pub TimeoutInstanceIdDomain => TimeoutInstanceId);

// Resource constraints
define_uuid!(pub ResourceRestraintIdDomain => ResourceRestraintId);
define_uuid!(pub ResourceConstraintInstanceIdDomain => ResourceConstraintInstanceId);
