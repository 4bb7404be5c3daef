use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use stratus_core::{InterruptId, NodeExecutionId, PlanExecutionId};
use stratus_execution::{Interrupt, InterruptKey, InterruptState};
use stratus_ports::{InterruptRepo, PortsError};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<InterruptId, Interrupt>,
    order: Vec<InterruptId>,
    /// Non-final interrupt per dedup key.
    open: HashMap<InterruptKey, InterruptId>,
}

impl Inner {
    fn listed(&self, keep: impl Fn(&Interrupt) -> bool) -> Vec<Interrupt> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|interrupt| keep(interrupt))
            .cloned()
            .collect()
    }
}

/// In-memory interrupt repository.
///
/// A single lock covers records and the dedup index so registration is one
/// atomic check-and-insert.
#[derive(Debug, Default)]
pub struct MemoryInterruptRepo {
    inner: Mutex<Inner>,
}

impl MemoryInterruptRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterruptRepo for MemoryInterruptRepo {
    async fn register_if_absent(&self, interrupt: Interrupt) -> Result<(Interrupt, bool), PortsError> {
        let mut inner = self.inner.lock();
        let key = interrupt.dedup_key();
        if let Some(existing) = inner.open.get(&key).and_then(|id| inner.records.get(id)) {
            return Ok((existing.clone(), false));
        }
        let id = interrupt.uuid;
        if inner.records.contains_key(&id) {
            return Err(PortsError::already_exists("Interrupt", id.to_string()));
        }
        inner.open.insert(key, id);
        inner.order.push(id);
        inner.records.insert(id, interrupt.clone());
        Ok((interrupt, true))
    }

    async fn get(&self, id: InterruptId) -> Result<Option<Interrupt>, PortsError> {
        Ok(self.inner.lock().records.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: InterruptId,
        from: InterruptState,
        to: InterruptState,
        failure_reason: Option<String>,
    ) -> Result<bool, PortsError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(interrupt) = inner.records.get_mut(&id) else {
            return Err(PortsError::not_found("Interrupt", id.to_string()));
        };
        if interrupt.state != from {
            return Ok(false);
        }
        interrupt
            .transition_to(to)
            .map_err(|e| PortsError::Internal(e.to_string()))?;
        if failure_reason.is_some() {
            interrupt.failure_reason = failure_reason;
        }
        let key = interrupt.dedup_key();
        if to.is_final() && inner.open.get(&key) == Some(&id) {
            inner.open.remove(&key);
        }
        Ok(true)
    }

    async fn by_plan_execution(
        &self,
        plan_execution_id: PlanExecutionId,
    ) -> Result<Vec<Interrupt>, PortsError> {
        Ok(self
            .inner
            .lock()
            .listed(|i| i.plan_execution_id == plan_execution_id))
    }

    async fn by_node_execution(
        &self,
        node_execution_id: NodeExecutionId,
    ) -> Result<Vec<Interrupt>, PortsError> {
        Ok(self
            .inner
            .lock()
            .listed(|i| i.node_execution_id == Some(node_execution_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stratus_execution::{InterruptType, IssuedBy};

    fn pause(pe: PlanExecutionId) -> Interrupt {
        Interrupt::new(
            InterruptType::Pause,
            pe,
            None,
            IssuedBy::Manual {
                identifier: "ops".into(),
            },
        )
    }

    #[tokio::test]
    async fn duplicate_is_suppressed_while_open() {
        let repo = MemoryInterruptRepo::new();
        let pe = PlanExecutionId::new();

        let (first, created) = repo.register_if_absent(pause(pe)).await.unwrap();
        assert!(created);
        let (dup, created) = repo.register_if_absent(pause(pe)).await.unwrap();
        assert!(!created);
        assert_eq!(dup.uuid, first.uuid);
        assert_eq!(repo.by_plan_execution(pe).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn final_interrupt_frees_the_key() {
        let repo = MemoryInterruptRepo::new();
        let pe = PlanExecutionId::new();
        let (first, _) = repo.register_if_absent(pause(pe)).await.unwrap();

        assert!(
            repo.transition(first.uuid, InterruptState::Registered, InterruptState::Processing, None)
                .await
                .unwrap()
        );
        assert!(
            repo.transition(
                first.uuid,
                InterruptState::Processing,
                InterruptState::ProcessedSuccessfully,
                None
            )
            .await
            .unwrap()
        );

        let (_, created) = repo.register_if_absent(pause(pe)).await.unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn transition_requires_expected_state() {
        let repo = MemoryInterruptRepo::new();
        let (interrupt, _) = repo
            .register_if_absent(pause(PlanExecutionId::new()))
            .await
            .unwrap();

        let moved = repo
            .transition(
                interrupt.uuid,
                InterruptState::Processing,
                InterruptState::ProcessedSuccessfully,
                None,
            )
            .await
            .unwrap();
        assert!(!moved);

        let moved = repo
            .transition(
                interrupt.uuid,
                InterruptState::Registered,
                InterruptState::ProcessedUnsuccessfully,
                Some("nothing to pause".into()),
            )
            .await
            .unwrap();
        assert!(moved);
        let stored = repo.get(interrupt.uuid).await.unwrap().unwrap();
        assert_eq!(stored.failure_reason.as_deref(), Some("nothing to pause"));
    }
}
