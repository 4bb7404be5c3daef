#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Telemetry
//!
//! Event bus, observers, and metrics for the Stratus orchestration engine.
//!
//! This crate provides:
//! - [`OrchestrationEvent`] -- plan and node lifecycle events
//! - [`EventBus`] -- broadcast-based event distribution
//! - [`ObserverHub`] -- bounded queue feeding [`OrchestrationObserver`]s
//!   on their own tasks
//! - [`MetricsRegistry`] -- named counters and gauges
//!
//! Events are **projections**, not the source of truth.
//! The persistence ports are the single source of truth.

pub mod event;
pub mod metrics;
pub mod observer;

pub use event::{EventBus, EventSubscriber, OrchestrationEvent, OrchestrationEventType};
pub use metrics::{Counter, Gauge, MetricsRegistry};
pub use observer::{ObserverError, ObserverHub, OrchestrationObserver};
