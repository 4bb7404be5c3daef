//! Interrupts and timeouts: abort, pause, resume, retry and expiry.

mod common;

use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use stratus_core::Status;
use stratus_engine::InterruptRequest;
use stratus_execution::{
    CustomFailure, FailureInfo, FailureType, InterruptState, InterruptType, IssuedBy,
};
use stratus_plan::{AdviserType, TimeoutObtainment, TimeoutTrackerType};
use stratus_telemetry::OrchestrationEventType;

fn absolute_timeout(millis: u64) -> TimeoutObtainment {
    TimeoutObtainment::new(TimeoutTrackerType::ABSOLUTE).with_parameters(json!({"timeout_ms": millis}))
}

#[tokio::test]
async fn timeout_expires_a_waiting_node() {
    let h = Harness::new();
    let slow = await_node("slow", &["never"]).with_timeout(absolute_timeout(50));
    let pe = h.start(plan(vec![slow.clone()])).await;

    let plan_execution = h.plan_reaches(pe, Status::Expired).await;
    assert_eq!(plan_execution.status, Status::Expired);
    let expired = h.node_reaches(pe, &slow, Status::Expired).await;
    let failure = expired.step_response.as_ref().unwrap().failure_info.clone().unwrap();
    assert!(failure.failure_types.contains(&FailureType::Timeout));

    let engine = &h.engine;
    let interrupt = eventually("the timeout interrupt to finish", || async move {
        let interrupts = engine.interrupts(pe).await.unwrap();
        assert_eq!(interrupts.len(), 1);
        interrupts.into_iter().find(|interrupt| interrupt.state.is_final())
    })
    .await;
    assert_eq!(interrupt.interrupt_type, InterruptType::CustomFailure);
    assert!(matches!(interrupt.issued_by, IssuedBy::Timeout { .. }));
    assert_eq!(interrupt.state, InterruptState::ProcessedSuccessfully);

    // A callback after expiry is a no-op.
    h.engine.handle_callback("never", json!("late")).await.unwrap();
    let after = h.engine.node_execution(expired.uuid).await.unwrap().unwrap();
    assert_eq!(after.status, Status::Expired);
    assert_eq!(after.step_response, expired.step_response);
    assert!(after.progress.responses.is_empty());
}

#[tokio::test]
async fn answered_node_cancels_its_timeout() {
    let h = Harness::new();
    let quick = await_node("quick", &["reply"]).with_timeout(absolute_timeout(80));
    let pe = h.start(plan(vec![quick.clone()])).await;

    h.node_reaches(pe, &quick, Status::AsyncWaiting).await;
    h.engine.handle_callback("reply", json!(true)).await.unwrap();
    h.plan_reaches(pe, Status::Succeeded).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.engine.interrupts(pe).await.unwrap().is_empty());
    let ne = h.node_reaches(pe, &quick, Status::Succeeded).await;
    assert_eq!(ne.status, Status::Succeeded);
}

#[tokio::test]
async fn equivalent_interrupts_are_registered_once() {
    let h = Harness::new();
    let waiting = await_node("waiting", &["go"]);
    let pe = h.start(plan(vec![waiting.clone()])).await;
    h.node_reaches(pe, &waiting, Status::AsyncWaiting).await;

    let first = h
        .engine
        .register_interrupt(InterruptRequest::for_plan(InterruptType::Pause, pe))
        .await
        .unwrap();
    let second = h
        .engine
        .register_interrupt(
            InterruptRequest::for_plan(InterruptType::Pause, pe).issued_by(IssuedBy::System {
                reason: "maintenance".into(),
            }),
        )
        .await
        .unwrap();
    assert_eq!(first.uuid, second.uuid);
    assert_eq!(h.engine.interrupts(pe).await.unwrap().len(), 1);

    assert_eq!(
        h.engine.process_interrupt(first.uuid).await.unwrap(),
        InterruptState::ProcessedSuccessfully
    );
    // Processing again does not apply it twice.
    assert_eq!(
        h.engine.process_interrupt(first.uuid).await.unwrap(),
        InterruptState::ProcessedSuccessfully
    );
    assert_eq!(h.engine.plan_execution(pe).await.unwrap().unwrap().status, Status::Paused);

    // Once processed, the same request registers anew.
    let third = h
        .engine
        .register_interrupt(InterruptRequest::for_plan(InterruptType::Pause, pe))
        .await
        .unwrap();
    assert_ne!(third.uuid, first.uuid);
    assert_eq!(
        h.engine.process_interrupt(third.uuid).await.unwrap(),
        InterruptState::ProcessedUnsuccessfully
    );
}

#[tokio::test]
async fn paused_plan_holds_callbacks_until_resumed() {
    let h = Harness::new();
    let after = outcome_node("after", json!({}));
    let waiting = await_node("waiting", &["go"]).with_adviser(on_success(&after));
    let pe = h.start(plan(vec![waiting.clone(), after.clone()])).await;
    h.node_reaches(pe, &waiting, Status::AsyncWaiting).await;

    let pause = h
        .engine
        .register_interrupt(InterruptRequest::for_plan(InterruptType::Pause, pe))
        .await
        .unwrap();
    h.engine.process_interrupt(pause.uuid).await.unwrap();
    let paused = h.node_reaches(pe, &waiting, Status::Paused).await;
    assert_eq!(paused.paused_from, Some(Status::AsyncWaiting));

    h.engine.handle_callback("go", json!("ready")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let still = h.engine.node_execution(paused.uuid).await.unwrap().unwrap();
    assert_eq!(still.status, Status::Paused);
    assert_eq!(h.attempts_of(&after), 0);

    let resume = h
        .engine
        .register_interrupt(InterruptRequest::for_plan(InterruptType::Resume, pe))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_interrupt(resume.uuid).await.unwrap(),
        InterruptState::ProcessedSuccessfully
    );

    h.plan_reaches(pe, Status::Succeeded).await;
    assert_eq!(h.attempts_of(&after), 1);
}

#[tokio::test]
async fn triggered_pause_and_resume_complete_the_plan() {
    let h = Harness::new();
    let gate = await_node("gate", &["open"]);
    let after = outcome_node("after", json!({}));
    let gate = gate.with_adviser(on_success(&after));
    let pe = h.start(plan(vec![gate.clone(), after.clone()])).await;
    h.node_reaches(pe, &gate, Status::AsyncWaiting).await;

    h.engine
        .trigger_interrupt(InterruptRequest::for_plan(InterruptType::Pause, pe))
        .await
        .unwrap();
    h.node_reaches(pe, &gate, Status::Paused).await;
    h.engine.handle_callback("open", json!(1)).await.unwrap();

    h.engine
        .trigger_interrupt(InterruptRequest::for_plan(InterruptType::Resume, pe))
        .await
        .unwrap();
    h.plan_reaches(pe, Status::Succeeded).await;
    let after_ne = h.node_reaches(pe, &after, Status::Succeeded).await;
    assert_eq!(after_ne.status, Status::Succeeded);
}

#[tokio::test]
async fn node_abort_registered_twice_aborts_once() {
    let h = Harness::new();
    let waiting = await_node("waiting", &["go"]);
    let pe = h.start(plan(vec![waiting.clone()])).await;
    let ne = h.node_reaches(pe, &waiting, Status::AsyncWaiting).await;

    let request = || InterruptRequest::for_node(InterruptType::Abort, pe, ne.uuid);
    let first = h.engine.register_interrupt(request()).await.unwrap();
    let second = h.engine.register_interrupt(request()).await.unwrap();
    assert_eq!(first.uuid, second.uuid);
    assert_eq!(h.engine.interrupts(pe).await.unwrap().len(), 1);

    let (a, b) = tokio::join!(
        h.engine.process_interrupt(first.uuid),
        h.engine.process_interrupt(second.uuid),
    );
    let states = [a.unwrap(), b.unwrap()];
    assert!(states.contains(&InterruptState::ProcessedSuccessfully));

    h.plan_reaches(pe, Status::Aborted).await;
    let executions = h.executions_of(pe, &waiting).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, Status::Aborted);
    assert_eq!(h.aborted.lock().as_slice(), &[ne.uuid]);

    // The key is free again once the first one is final.
    let third = h.engine.register_interrupt(request()).await.unwrap();
    assert_ne!(third.uuid, first.uuid);
    assert_eq!(h.engine.interrupts(pe).await.unwrap().len(), 2);
    assert_eq!(
        h.engine.process_interrupt(third.uuid).await.unwrap(),
        InterruptState::ProcessedUnsuccessfully
    );
    assert_eq!(h.aborted.lock().len(), 1);
}

#[tokio::test]
async fn manual_retry_only_applies_to_failed_nodes() {
    let h = Harness::new();
    let slow = await_node("slow", &["never"]).with_timeout(absolute_timeout(50));
    let pe = h.start(plan(vec![slow.clone()])).await;
    let expired = h.node_reaches(pe, &slow, Status::Expired).await;
    h.plan_reaches(pe, Status::Expired).await;

    let retry = h
        .engine
        .register_interrupt(InterruptRequest::for_node(InterruptType::Retry, pe, expired.uuid))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_interrupt(retry.uuid).await.unwrap(),
        InterruptState::ProcessedUnsuccessfully
    );
    let stored = h
        .engine
        .interrupts(pe)
        .await
        .unwrap()
        .into_iter()
        .find(|interrupt| interrupt.uuid == retry.uuid)
        .unwrap();
    assert!(stored.failure_reason.unwrap().contains("expired"));
    assert_eq!(h.executions_of(pe, &slow).await.len(), 1);
    assert_eq!(h.engine.plan_execution(pe).await.unwrap().unwrap().status, Status::Expired);
}

#[tokio::test]
async fn manual_retry_reopens_a_failed_plan() {
    let h = Harness::new();
    let mut events = h.engine.subscribe();
    let flaky = outcome_node("flaky", json!({"fail_times": 1}));
    let pe = h.start(plan(vec![flaky.clone()])).await;

    h.plan_reaches(pe, Status::Failed).await;
    let failed = h.node_reaches(pe, &flaky, Status::Failed).await;

    let retry = h
        .engine
        .register_interrupt(InterruptRequest::for_node(InterruptType::Retry, pe, failed.uuid))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_interrupt(retry.uuid).await.unwrap(),
        InterruptState::ProcessedSuccessfully
    );

    h.plan_reaches(pe, Status::Succeeded).await;
    let executions = h.executions_of(pe, &flaky).await;
    assert_eq!(executions.len(), 2);
    assert!(executions[0].old_retry);
    assert_eq!(executions[1].retry_ids, vec![failed.uuid]);
    assert_eq!(executions[1].status, Status::Succeeded);

    // The plan ended twice but announced its end once.
    let mut ends = 0;
    while let Some(event) = events.try_recv() {
        if event.event_type == OrchestrationEventType::OrchestrationEnd {
            ends += 1;
        }
    }
    assert_eq!(ends, 1);

    // A superseded attempt cannot be retried again.
    let interrupt = h
        .engine
        .register_interrupt(InterruptRequest::for_node(InterruptType::Retry, pe, failed.uuid))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_interrupt(interrupt.uuid).await.unwrap(),
        InterruptState::ProcessedUnsuccessfully
    );
}

#[tokio::test]
async fn abort_adviser_aborts_the_node() {
    let h = Harness::new();
    let next = outcome_node("next", json!({}));
    let doomed = outcome_node("doomed", json!({"status": "failed"}))
        .with_adviser(adviser(AdviserType::ABORT, json!({})))
        .with_adviser(on_success(&next));
    let pe = h.start(plan(vec![doomed.clone(), next.clone()])).await;

    h.plan_reaches(pe, Status::Aborted).await;
    let ne = h.node_reaches(pe, &doomed, Status::Aborted).await;
    assert_eq!(ne.status, Status::Aborted);
    assert_eq!(h.attempts_of(&next), 0);

    let interrupts = h.engine.interrupts(pe).await.unwrap();
    assert_eq!(interrupts.len(), 1);
    assert!(matches!(interrupts[0].issued_by, IssuedBy::Adviser { .. }));
}

#[tokio::test]
async fn custom_failure_runs_the_adviser_chain() {
    let h = Harness::new();
    let fallback = outcome_node("fallback", json!({}));
    let waiting = await_node("waiting", &["never"]).with_adviser(adviser(
        AdviserType::ON_FAIL,
        json!({"applicable_failure_types": ["APPROVAL_REJECTION"], "next_node_id": fallback.uuid}),
    ));
    let pe = h.start(plan(vec![waiting.clone(), fallback.clone()])).await;
    let ne = h.node_reaches(pe, &waiting, Status::AsyncWaiting).await;

    let state = {
        let interrupt = h
            .engine
            .register_interrupt(
                InterruptRequest::for_node(InterruptType::CustomFailure, pe, ne.uuid).with_custom_failure(
                    CustomFailure {
                        status: Status::Failed,
                        failure_info: FailureInfo::new("rejected by reviewer")
                            .with_type(FailureType::ApprovalRejection),
                    },
                ),
            )
            .await
            .unwrap();
        h.engine.process_interrupt(interrupt.uuid).await.unwrap()
    };
    assert_eq!(state, InterruptState::ProcessedSuccessfully);

    h.plan_reaches(pe, Status::Succeeded).await;
    let failed = h.node_reaches(pe, &waiting, Status::Failed).await;
    assert!(failed.next_id.is_some());
    assert_eq!(h.aborted.lock().as_slice(), &[ne.uuid]);
}

#[tokio::test]
async fn interrupt_for_another_plan_is_rejected() {
    let h = Harness::new();
    let a = await_node("a", &["a"]);
    let b = await_node("b", &["b"]);
    let pe_a = h.start(plan(vec![a.clone()])).await;
    let pe_b = h.start(plan(vec![b.clone()])).await;
    let ne_a = h.node_reaches(pe_a, &a, Status::AsyncWaiting).await;

    let err = h
        .engine
        .register_interrupt(InterruptRequest::for_node(InterruptType::Abort, pe_b, ne_a.uuid))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another plan execution"));
}
