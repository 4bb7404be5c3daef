//! Run command - executes a plan on in-memory storage with the demo steps.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use stratus_core::{PlanExecutionId, Status};
use stratus_engine::{InterruptRequest, OrchestrationEngine};
use stratus_execution::{InterruptType, NodeExecution};
use stratus_storage_memory::MemoryStorage;
use stratus_telemetry::{EventSubscriber, OrchestrationEventType};

use super::read_plan;
use crate::config::Settings;
use crate::steps;

/// How long an aborted plan gets to wind down after the deadline.
const ABORT_GRACE: Duration = Duration::from_secs(5);

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan file (JSON)
    pub plan: PathBuf,

    /// Abort the plan if it has not ended after this many seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

/// Result of a run, printed as JSON.
#[derive(Debug, Serialize)]
struct RunReport {
    plan_execution_id: PlanExecutionId,
    status: Status,
    timed_out: bool,
    node_executions: Vec<NodeExecution>,
    metrics: BTreeMap<String, i64>,
}

/// Run the run command.
pub async fn run(args: RunArgs, settings: &Settings) -> Result<ExitCode> {
    let plan = read_plan(&args.plan)?;
    let engine = build_engine(settings)?;

    let mut events = engine.subscribe();
    let plan_execution_id = engine
        .start_plan(plan, BTreeMap::new())
        .await
        .context("plan could not be started")?;
    tracing::info!(%plan_execution_id, "plan started");

    let deadline = Duration::from_secs(args.timeout_secs);
    let timed_out = tokio::time::timeout(deadline, wait_for_end(&mut events, plan_execution_id))
        .await
        .is_err();
    if timed_out {
        tracing::warn!(%plan_execution_id, timeout_secs = args.timeout_secs, "plan did not end in time, aborting");
        engine
            .trigger_interrupt(InterruptRequest::for_plan(InterruptType::Abort, plan_execution_id))
            .await?;
        if tokio::time::timeout(ABORT_GRACE, wait_for_end(&mut events, plan_execution_id))
            .await
            .is_err()
        {
            tracing::warn!(%plan_execution_id, "plan did not wind down after the abort");
        }
    }

    let report = report(&engine, plan_execution_id, timed_out).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.status == Status::Succeeded && !timed_out {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_engine(settings: &Settings) -> Result<OrchestrationEngine> {
    let storage = MemoryStorage::new();
    let engine = OrchestrationEngine::builder()
        .node_executions(storage.node_executions)
        .plan_executions(storage.plan_executions)
        .interrupts(storage.interrupts)
        .constraints(storage.constraints)
        .steps(steps::registry())
        .config(settings.engine.clone())
        .build()?;
    Ok(engine)
}

/// Returns once the plan execution announces its end, or the bus closes.
async fn wait_for_end(events: &mut EventSubscriber, plan_execution_id: PlanExecutionId) {
    while let Some(event) = events.recv().await {
        if event.event_type == OrchestrationEventType::OrchestrationEnd
            && event.plan_execution_id() == plan_execution_id
        {
            return;
        }
    }
}

async fn report(
    engine: &OrchestrationEngine,
    plan_execution_id: PlanExecutionId,
    timed_out: bool,
) -> Result<RunReport> {
    let plan_execution = engine
        .plan_execution(plan_execution_id)
        .await?
        .context("plan execution is missing")?;
    let mut node_executions = engine.node_executions(plan_execution_id).await?;
    node_executions.sort_by_key(|ne| ne.created_at);

    Ok(RunReport {
        plan_execution_id,
        status: plan_execution.status,
        timed_out,
        node_executions,
        metrics: engine.metrics().snapshot(),
    })
}
