//! Correlation-id routing for asynchronous step completion.
//!
//! A callback may arrive before the node registered its correlation id; it is
//! stashed and handed over at registration. The stash is bounded and drops
//! its oldest entry when full.
//!
//! A correlation id counts as delivered once the waiting node accepted it.
//! Delivered ids are kept per plan execution and dropped with the plan.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use stratus_core::{NodeExecutionId, PlanExecutionId};
use stratus_execution::{CallbackKey, CallbackLedger};

/// Where an arriving callback goes.
#[derive(Debug, PartialEq)]
pub(crate) enum Arrival {
    /// A node waits for it.
    Deliver {
        node_execution_id: NodeExecutionId,
        response: Value,
    },
    /// Nobody registered the correlation id yet.
    Stashed,
}

/// Responses that arrived before their node registered, oldest first.
struct EarlyStash {
    responses: HashMap<String, Value>,
    order: VecDeque<String>,
    capacity: usize,
}

impl EarlyStash {
    fn insert(&mut self, correlation_id: String, response: Value) {
        if self.responses.insert(correlation_id.clone(), response).is_none() {
            self.order.push_back(correlation_id);
        }
        while self.responses.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.responses.remove(&oldest);
            tracing::warn!(correlation_id = %oldest, "callback stash full, dropping oldest callback");
        }
    }

    fn take(&mut self, correlation_id: &str) -> Option<Value> {
        let response = self.responses.remove(correlation_id)?;
        self.order.retain(|id| id != correlation_id);
        Some(response)
    }
}

pub(crate) struct CallbackRegistry {
    waiters: DashMap<String, NodeExecutionId>,
    // Guards `waiters` transitions against concurrent arrivals too.
    early: Mutex<EarlyStash>,
    ledgers: DashMap<PlanExecutionId, CallbackLedger>,
}

impl CallbackRegistry {
    pub(crate) fn new(stash_capacity: usize) -> Self {
        Self {
            waiters: DashMap::new(),
            early: Mutex::new(EarlyStash {
                responses: HashMap::new(),
                order: VecDeque::new(),
                capacity: stash_capacity,
            }),
            ledgers: DashMap::new(),
        }
    }

    /// Routes `correlation_id` to `node_execution_id`.
    ///
    /// Returns the response if it arrived before registration. A stashed
    /// response for an id the plan already consumed is discarded.
    pub(crate) fn register(
        &self,
        plan_execution_id: PlanExecutionId,
        correlation_id: &str,
        node_execution_id: NodeExecutionId,
    ) -> Option<Value> {
        let mut early = self.early.lock();
        match early.take(correlation_id) {
            Some(response) if !self.is_delivered(plan_execution_id, correlation_id) => Some(response),
            _ => {
                self.waiters.insert(correlation_id.to_owned(), node_execution_id);
                None
            }
        }
    }

    pub(crate) fn arrive(&self, correlation_id: String, response: Value) -> Arrival {
        let mut early = self.early.lock();
        if let Some((_, node_execution_id)) = self.waiters.remove(&correlation_id) {
            return Arrival::Deliver {
                node_execution_id,
                response,
            };
        }
        early.insert(correlation_id, response);
        Arrival::Stashed
    }

    /// Puts a waiter back after a delivery that did not go through.
    pub(crate) fn restore(&self, correlation_id: &str, node_execution_id: NodeExecutionId) {
        let _early = self.early.lock();
        self.waiters.insert(correlation_id.to_owned(), node_execution_id);
    }

    pub(crate) fn is_delivered(&self, plan_execution_id: PlanExecutionId, correlation_id: &str) -> bool {
        self.ledgers
            .get(&plan_execution_id)
            .is_some_and(|ledger| ledger.is_seen(&CallbackKey::new(correlation_id)))
    }

    /// Returns `false` if the id was already marked for this plan execution.
    pub(crate) fn mark_delivered(&self, plan_execution_id: PlanExecutionId, correlation_id: &str) -> bool {
        self.ledgers
            .entry(plan_execution_id)
            .or_default()
            .check_and_mark(&CallbackKey::new(correlation_id))
    }

    /// Drops the waiters a concluded node left behind.
    pub(crate) fn forget_waits(&self, node_execution_id: NodeExecutionId, correlation_ids: &[String]) {
        let _early = self.early.lock();
        for correlation_id in correlation_ids {
            self.waiters
                .remove_if(correlation_id, |_, waiter| *waiter == node_execution_id);
        }
    }

    pub(crate) fn forget_plan(&self, plan_execution_id: PlanExecutionId) {
        self.ledgers.remove(&plan_execution_id);
    }

    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.waiters.len()
    }

    #[cfg(test)]
    fn stashed(&self) -> usize {
        self.early.lock().responses.len()
    }
}
