//! Callback delivery and the lifetime of ended plans.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use stratus_core::Status;
use stratus_engine::{EngineConfig, EngineError, InterruptRequest};
use stratus_execution::{InterruptState, InterruptType};

#[tokio::test]
async fn callback_is_redelivered_after_a_storage_error() {
    let h = Harness::new();
    let wait = await_node("wait", &["deploy-done"]);
    let pe = h.start(plan(vec![wait.clone()])).await;
    h.node_reaches(pe, &wait, Status::AsyncWaiting).await;

    h.node_executions.fail_next_reads(1);
    let err = h
        .engine
        .handle_callback("deploy-done", json!({"ok": true}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Ports(_)));
    let still_waiting = h.node_reaches(pe, &wait, Status::AsyncWaiting).await;
    assert!(still_waiting.progress.responses.is_empty());

    h.engine
        .handle_callback("deploy-done", json!({"ok": true}))
        .await
        .unwrap();
    h.plan_reaches(pe, Status::Succeeded).await;

    // Once accepted, a repeat changes nothing.
    h.engine
        .handle_callback("deploy-done", json!({"ok": false}))
        .await
        .unwrap();
    let done = h.node_reaches(pe, &wait, Status::Succeeded).await;
    assert_eq!(
        done.step_response.unwrap().outcomes["responses"],
        json!({"deploy-done": {"ok": true}})
    );
}

#[tokio::test]
async fn callback_before_the_wait_is_delivered_at_registration() {
    let h = Harness::new();
    h.engine
        .handle_callback("early", json!("ready"))
        .await
        .unwrap();

    let wait = await_node("wait", &["early"]);
    let pe = h.start(plan(vec![wait.clone()])).await;

    h.plan_reaches(pe, Status::Succeeded).await;
    let done = h.node_reaches(pe, &wait, Status::Succeeded).await;
    assert_eq!(
        done.step_response.unwrap().outcomes["responses"],
        json!({"early": "ready"})
    );
}

#[tokio::test]
async fn ended_plans_beyond_the_retention_are_evicted() {
    let h = Harness::with_config(EngineConfig {
        ended_plan_retention: 1,
        ..EngineConfig::default()
    });
    let first = outcome_node("first", json!({"status": "failed"}));
    let first_pe = h.start(plan(vec![first.clone()])).await;
    h.plan_reaches(first_pe, Status::Failed).await;
    let failed = h.node_reaches(first_pe, &first, Status::Failed).await;

    let second = outcome_node("second", json!({}));
    let second_pe = h.start(plan(vec![second])).await;
    h.plan_reaches(second_pe, Status::Succeeded).await;

    let engine = &h.engine;
    eventually("the first plan to be evicted", || async move {
        engine.plan(first_pe).is_none().then_some(())
    })
    .await;
    assert!(h.engine.plan(second_pe).is_some());

    // An evicted plan cannot be reopened.
    let retry = h
        .engine
        .register_interrupt(InterruptRequest::for_node(
            InterruptType::Retry,
            first_pe,
            failed.uuid,
        ))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_interrupt(retry.uuid).await.unwrap(),
        InterruptState::ProcessedUnsuccessfully
    );
    let plan_execution = h.engine.plan_execution(first_pe).await.unwrap().unwrap();
    assert_eq!(plan_execution.status, Status::Failed);
}
