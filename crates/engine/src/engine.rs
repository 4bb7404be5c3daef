//! The orchestration engine facade.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use stratus_core::{
    Ambiance, InterruptId, NodeExecutionId, PlanExecutionId, PlanNodeId, ResourceConstraintInstanceId,
    Status,
};
use stratus_execution::{
    DeferredAction, Interrupt, InterruptState, NodeExecution, PlanExecution, ResourceRestraint,
    StepResponse,
};
use stratus_plan::{AdviserType, FacilitatorType, Plan, TimeoutTrackerType, validate_plan};
use stratus_ports::{
    InterruptRepo, NodeExecutionRepo, PlanExecutionRepo, ResourceConstraintRepo, TaskDispatcher,
};
use stratus_step::{Executable, StepRegistry};
use stratus_telemetry::metrics::names;
use stratus_telemetry::{
    EventSubscriber, MetricsRegistry, ObserverHub, OrchestrationEvent, OrchestrationEventType,
    OrchestrationObserver,
};
use tokio::sync::mpsc;

use crate::advise::{Adviser, AdviserRegistry};
use crate::callback::CallbackRegistry;
use crate::config::EngineConfig;
use crate::constraint::{RESOURCE_RESTRAINT, ResourceConstraintEngine, ResourceRestraintStep};
use crate::driver::{EngineInner, NodeStart};
use crate::error::EngineError;
use crate::facilitate::{Facilitator, FacilitatorRegistry};
use crate::interrupt::InterruptRequest;
use crate::lock::KeyedLocks;
use crate::signal::spawn_listener;
use crate::timeout::{TimeoutEngine, TimeoutTracker};

/// Drives plan executions node by node.
///
/// Cheap to clone; clones share the same state.
///
/// # Examples
///
/// ```rust,ignore
/// let storage = MemoryStorage::new();
/// let engine = OrchestrationEngine::builder()
///     .node_executions(storage.node_executions.clone())
///     .plan_executions(storage.plan_executions.clone())
///     .interrupts(storage.interrupts.clone())
///     .constraints(storage.constraints.clone())
///     .steps(steps)
///     .build()?;
///
/// let plan_execution_id = engine.start_plan(plan, BTreeMap::new()).await?;
/// ```
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

impl OrchestrationEngine {
    /// Starts configuring an engine.
    #[must_use]
    pub fn builder() -> OrchestrationEngineBuilder {
        OrchestrationEngineBuilder::default()
    }

    /// Validates `plan`, creates a RUNNING plan execution and starts the
    /// plan's start node.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidPlan`] for the first validation error, or a
    /// storage error. A fault while starting the first node fails that
    /// node instead.
    pub async fn start_plan(
        &self,
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Result<PlanExecutionId, EngineError> {
        if let Some(err) = validate_plan(&plan).into_iter().next() {
            return Err(EngineError::InvalidPlan(err));
        }
        let inner = &self.inner;
        let mut plan_execution = PlanExecution::new(PlanExecutionId::new(), plan.uuid())
            .with_setup_abstractions(setup_abstractions.clone());
        plan_execution.transition_to(Status::Running)?;
        let plan_execution_id = plan_execution.uuid;
        let plan_id = plan.uuid();
        let start_node_id = plan.start_node_id();

        inner.plan_executions.insert(plan_execution).await?;
        inner.plans.insert(plan_execution_id, Arc::new(plan));
        inner.metrics.counter(names::PLAN_EXECUTIONS_STARTED).inc();

        let ambiance =
            Ambiance::new(plan_execution_id, plan_id).with_setup_abstractions(setup_abstractions);
        inner.hub.publish_once(OrchestrationEvent::new(
            OrchestrationEventType::OrchestrationStart,
            ambiance.clone(),
        ));
        tracing::info!(%plan_execution_id, %plan_id, "plan execution started");

        match inner.run_start(NodeStart::new(ambiance, start_node_id)).await {
            Ok(_) => Ok(plan_execution_id),
            Err(err @ EngineError::NotAdmitted { .. }) => {
                tracing::debug!(%plan_execution_id, error = %err, "start node not admitted");
                Ok(plan_execution_id)
            }
            Err(err) => {
                inner.finish_plan(plan_execution_id, Status::Errored).await?;
                Err(err)
            }
        }
    }

    /// Starts `plan_node_id` under `ambiance`.
    ///
    /// The new node's parent is the ambiance's current level, if any. Its
    /// plan execution must have been started by this engine.
    ///
    /// # Errors
    ///
    /// Unknown plan execution or node, a plan that no longer admits nodes,
    /// or a storage error.
    pub async fn start_node(
        &self,
        ambiance: Ambiance,
        plan_node_id: PlanNodeId,
    ) -> Result<NodeExecutionId, EngineError> {
        self.inner
            .run_start(NodeStart::new(ambiance, plan_node_id))
            .await
    }

    /// Feeds a step response for `id` into its adviser chain.
    ///
    /// A response for a PAUSED node is applied on RESUME. A response for a
    /// node being aborted is dropped.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyConcluded`] for terminal nodes.
    pub async fn handle_step_response(
        &self,
        id: NodeExecutionId,
        response: StepResponse,
    ) -> Result<(), EngineError> {
        self.with_node(id, |inner, ne| {
            Box::pin(async move {
                match ne.status {
                    status if status.is_terminal() => Err(EngineError::AlreadyConcluded { id }),
                    Status::Discontinuing => {
                        tracing::debug!(node_execution_id = %id, "step response for a discontinuing node dropped");
                        Ok(())
                    }
                    Status::Paused => {
                        ne.progress.deferred = Some(DeferredAction::Respond { response });
                        inner.save(ne).await
                    }
                    _ => {
                        let result = inner.process_step_response_locked(ne, response).await;
                        inner.absorb_fault(ne, result).await
                    }
                }
            })
        })
        .await
    }

    /// Concludes `id` with `status`, skipping the adviser chain.
    ///
    /// # Errors
    ///
    /// [`EngineError::NonTerminalStatus`] or [`EngineError::AlreadyConcluded`].
    pub async fn conclude_node_execution(&self, id: NodeExecutionId, status: Status) -> Result<(), EngineError> {
        self.with_node(id, |inner, ne| {
            Box::pin(async move { inner.conclude_locked(ne, status, None).await })
        })
        .await
    }

    /// Delivers an external callback. Duplicates are ignored.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn handle_callback(
        &self,
        correlation_id: impl Into<String>,
        response: Value,
    ) -> Result<(), EngineError> {
        self.inner
            .handle_callback(correlation_id.into(), response)
            .await
    }

    /// Registers an interrupt and processes it in the background.
    ///
    /// # Errors
    ///
    /// Invalid requests and unknown targets.
    pub async fn trigger_interrupt(&self, request: InterruptRequest) -> Result<InterruptId, EngineError> {
        let interrupt = self.inner.register_interrupt(request).await?;
        let inner = Arc::clone(&self.inner);
        let id = interrupt.uuid;
        tokio::spawn(async move {
            if let Err(err) = inner.process_interrupt(id).await {
                tracing::warn!(interrupt_id = %id, error = %err, "interrupt processing failed");
            }
        });
        Ok(id)
    }

    /// Registers an interrupt without processing it.
    ///
    /// An equivalent interrupt still registered or processing is returned
    /// instead of a new one.
    ///
    /// # Errors
    ///
    /// Invalid requests and unknown targets.
    pub async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, EngineError> {
        self.inner.register_interrupt(request).await
    }

    /// Processes a registered interrupt and returns its final state.
    ///
    /// # Errors
    ///
    /// Unknown interrupts and storage errors.
    pub async fn process_interrupt(&self, id: InterruptId) -> Result<InterruptState, EngineError> {
        self.inner.process_interrupt(id).await
    }

    /// Current status of a node execution.
    ///
    /// # Errors
    ///
    /// [`EngineError::NodeExecutionNotFound`].
    pub async fn get_node_execution_status(&self, id: NodeExecutionId) -> Result<Status, EngineError> {
        Ok(self.inner.load(id).await?.status)
    }

    /// A node execution.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn node_execution(&self, id: NodeExecutionId) -> Result<Option<NodeExecution>, EngineError> {
        Ok(self.inner.node_executions.get(id).await?)
    }

    /// The plan a plan execution runs, while the engine still holds it.
    ///
    /// An ended plan execution is dropped once more than
    /// [`EngineConfig::ended_plan_retention`] newer ones have ended.
    #[must_use]
    pub fn plan(&self, id: PlanExecutionId) -> Option<Arc<Plan>> {
        self.inner.plan(id).ok()
    }

    /// A plan execution.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn plan_execution(&self, id: PlanExecutionId) -> Result<Option<PlanExecution>, EngineError> {
        Ok(self.inner.plan_executions.get(id).await?)
    }

    /// Every node execution of a plan execution, oldest first.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn node_executions(&self, id: PlanExecutionId) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self.inner.node_executions.by_plan_execution(id).await?)
    }

    /// Children of a node execution, retried attempts included.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn children(&self, parent_id: NodeExecutionId) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self.inner.node_executions.children(parent_id).await?)
    }

    /// Latest attempt of a plan node that was not superseded by a retry.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn latest_for_node(
        &self,
        plan_execution_id: PlanExecutionId,
        node_id: PlanNodeId,
    ) -> Result<Option<NodeExecution>, EngineError> {
        Ok(self
            .inner
            .node_executions
            .latest_for_node(plan_execution_id, node_id)
            .await?)
    }

    /// Interrupts registered against a plan execution, oldest first.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn interrupts(&self, plan_execution_id: PlanExecutionId) -> Result<Vec<Interrupt>, EngineError> {
        Ok(self.inner.interrupts.by_plan_execution(plan_execution_id).await?)
    }

    /// Registers a restraint for the `RESOURCE_RESTRAINT` step.
    ///
    /// # Errors
    ///
    /// Zero capacity or storage errors.
    pub async fn register_resource_restraint(&self, restraint: ResourceRestraint) -> Result<(), EngineError> {
        self.inner.constraints.register_restraint(restraint).await
    }

    /// Releases one constraint instance ahead of its holding scope.
    ///
    /// Returns `false` when it was already released.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn release_resource_constraint(
        &self,
        id: ResourceConstraintInstanceId,
    ) -> Result<bool, EngineError> {
        self.inner.constraints.release_instance(id).await
    }

    /// The resource constraint engine behind the `RESOURCE_RESTRAINT` step.
    #[must_use]
    pub fn constraints(&self) -> Arc<ResourceConstraintEngine> {
        Arc::clone(&self.inner.constraints)
    }

    /// Receives every orchestration event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscriber {
        self.inner.hub.subscribe()
    }

    /// Engine metrics.
    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.metrics
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Runs `f` on a loaded node execution while holding its guard.
    async fn with_node<F>(&self, id: NodeExecutionId, f: F) -> Result<(), EngineError>
    where
        F: for<'a> FnOnce(
            &'a Arc<EngineInner>,
            &'a mut NodeExecution,
        ) -> futures::future::BoxFuture<'a, Result<(), EngineError>>,
    {
        let inner = &self.inner;
        let guard = inner.lock_node(id).await;
        let result = match inner.load(id).await {
            Ok(mut ne) => f(inner, &mut ne).await,
            Err(err) => Err(err),
        };
        inner.unlock(id, guard);
        result
    }
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("inner", &self.inner)
            .finish()
    }
}

/// Builder for [`OrchestrationEngine`].
#[derive(Default)]
pub struct OrchestrationEngineBuilder {
    node_executions: Option<Arc<dyn NodeExecutionRepo>>,
    plan_executions: Option<Arc<dyn PlanExecutionRepo>>,
    interrupts: Option<Arc<dyn InterruptRepo>>,
    constraints: Option<Arc<dyn ResourceConstraintRepo>>,
    steps: Option<StepRegistry>,
    task_dispatcher: Option<Arc<dyn TaskDispatcher>>,
    observers: Vec<Arc<dyn OrchestrationObserver>>,
    advisers: Vec<(AdviserType, Arc<dyn Adviser>)>,
    facilitators: Vec<(FacilitatorType, Arc<dyn Facilitator>)>,
    timeout_trackers: Vec<(TimeoutTrackerType, Arc<dyn TimeoutTracker>)>,
    config: EngineConfig,
}

impl OrchestrationEngineBuilder {
    /// Node execution storage. Required.
    #[must_use]
    pub fn node_executions(mut self, repo: Arc<dyn NodeExecutionRepo>) -> Self {
        self.node_executions = Some(repo);
        self
    }

    /// Plan execution storage. Required.
    #[must_use]
    pub fn plan_executions(mut self, repo: Arc<dyn PlanExecutionRepo>) -> Self {
        self.plan_executions = Some(repo);
        self
    }

    /// Interrupt storage. Required.
    #[must_use]
    pub fn interrupts(mut self, repo: Arc<dyn InterruptRepo>) -> Self {
        self.interrupts = Some(repo);
        self
    }

    /// Resource constraint storage. Required.
    #[must_use]
    pub fn constraints(mut self, repo: Arc<dyn ResourceConstraintRepo>) -> Self {
        self.constraints = Some(repo);
        self
    }

    /// Registered steps. Defaults to an empty registry.
    #[must_use]
    pub fn steps(mut self, steps: StepRegistry) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Receives the tasks of TASK and TASK_CHAIN steps.
    #[must_use]
    pub fn task_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.task_dispatcher = Some(dispatcher);
        self
    }

    /// Adds an observer of orchestration events.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn OrchestrationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Registers an adviser, replacing a built-in of the same type.
    #[must_use]
    pub fn adviser(mut self, adviser_type: impl Into<AdviserType>, adviser: Arc<dyn Adviser>) -> Self {
        self.advisers.push((adviser_type.into(), adviser));
        self
    }

    /// Registers a facilitator, replacing a built-in of the same type.
    #[must_use]
    pub fn facilitator(
        mut self,
        facilitator_type: impl Into<FacilitatorType>,
        facilitator: Arc<dyn Facilitator>,
    ) -> Self {
        self.facilitators.push((facilitator_type.into(), facilitator));
        self
    }

    /// Registers a timeout tracker, replacing a built-in of the same type.
    #[must_use]
    pub fn timeout_tracker(
        mut self,
        tracker_type: impl Into<TimeoutTrackerType>,
        tracker: Arc<dyn TimeoutTracker>,
    ) -> Self {
        self.timeout_trackers.push((tracker_type.into(), tracker));
        self
    }

    /// Engine tunables.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine and starts its background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`EngineError::MissingComponent`] when a repository was not set.
    pub fn build(self) -> Result<OrchestrationEngine, EngineError> {
        let node_executions = self
            .node_executions
            .ok_or(EngineError::MissingComponent("a node execution repository"))?;
        let plan_executions = self
            .plan_executions
            .ok_or(EngineError::MissingComponent("a plan execution repository"))?;
        let interrupts = self
            .interrupts
            .ok_or(EngineError::MissingComponent("an interrupt repository"))?;
        let constraint_repo = self
            .constraints
            .ok_or(EngineError::MissingComponent("a resource constraint repository"))?;

        let config = self.config;
        let (signals, receiver) = mpsc::unbounded_channel();

        let constraints = Arc::new(ResourceConstraintEngine::new(constraint_repo, signals.clone()));
        let steps = self.steps.unwrap_or_default();
        if !steps.contains(RESOURCE_RESTRAINT) {
            steps.register(
                RESOURCE_RESTRAINT,
                Executable::Async(Arc::new(ResourceRestraintStep::new(Arc::clone(&constraints)))),
            );
        }

        let timeouts = TimeoutEngine::new(signals, config.default_timeout);
        for (tracker_type, tracker) in self.timeout_trackers {
            timeouts.register_tracker(tracker_type, tracker);
        }
        let advisers = AdviserRegistry::with_builtins(config.max_adviser_fallback_depth);
        for (adviser_type, adviser) in self.advisers {
            advisers.register(adviser_type, adviser);
        }
        let facilitators = FacilitatorRegistry::with_builtins();
        for (facilitator_type, facilitator) in self.facilitators {
            facilitators.register(facilitator_type, facilitator);
        }
        let hub = ObserverHub::start(
            self.observers,
            config.observer_queue_capacity,
            config.event_bus_capacity,
        );

        let inner = Arc::new(EngineInner {
            node_executions,
            plan_executions,
            interrupts,
            steps,
            task_dispatcher: self.task_dispatcher,
            facilitators,
            advisers,
            timeouts,
            constraints,
            callbacks: CallbackRegistry::new(config.callback_stash_capacity),
            plans: DashMap::new(),
            ended_plans: Mutex::new(VecDeque::new()),
            node_locks: KeyedLocks::new(),
            plan_locks: KeyedLocks::new(),
            hub,
            metrics: MetricsRegistry::new(),
            config,
        });
        spawn_listener(Arc::downgrade(&inner), receiver);
        tracing::debug!(steps = inner.steps.len(), "orchestration engine built");
        Ok(OrchestrationEngine { inner })
    }
}

impl std::fmt::Debug for OrchestrationEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngineBuilder")
            .field("observers", &self.observers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
