#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Stratus Storage Memory Driver
//!
//! In-memory implementations of the repository ports:
//!
//! - [`MemoryNodeExecutionRepo`] implements [`NodeExecutionRepo`]
//! - [`MemoryPlanExecutionRepo`] implements [`PlanExecutionRepo`]
//! - [`MemoryInterruptRepo`] implements [`InterruptRepo`]
//! - [`MemoryConstraintRepo`] implements [`ResourceConstraintRepo`]
//!
//! [`MemoryStorage`] bundles one of each behind `Arc<dyn _>` handles.
//!
//! Records live in `DashMap`s; every record carries an insertion sequence so
//! listings come back oldest first. Nothing is persisted across restarts.
//!
//! [`NodeExecutionRepo`]: stratus_ports::NodeExecutionRepo
//! [`PlanExecutionRepo`]: stratus_ports::PlanExecutionRepo
//! [`InterruptRepo`]: stratus_ports::InterruptRepo
//! [`ResourceConstraintRepo`]: stratus_ports::ResourceConstraintRepo

mod constraint;
mod interrupt;
mod node_execution;
mod plan_execution;
mod storage;

pub use constraint::MemoryConstraintRepo;
pub use interrupt::MemoryInterruptRepo;
pub use node_execution::MemoryNodeExecutionRepo;
pub use plan_execution::MemoryPlanExecutionRepo;
pub use storage::MemoryStorage;

/// A stored value tagged with its insertion sequence.
#[derive(Debug, Clone)]
struct Stored<T> {
    seq: u64,
    value: T,
}

/// Collects matching values from a map of [`Stored`] records, oldest first.
fn collect_sorted<K, T, F>(map: &dashmap::DashMap<K, Stored<T>>, mut keep: F) -> Vec<T>
where
    K: Eq + std::hash::Hash,
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let mut found: Vec<(u64, T)> = map
        .iter()
        .filter(|entry| keep(&entry.value().value))
        .map(|entry| (entry.value().seq, entry.value().value.clone()))
        .collect();
    found.sort_by_key(|(seq, _)| *seq);
    found.into_iter().map(|(_, value)| value).collect()
}
