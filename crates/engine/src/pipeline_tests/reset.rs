// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reset and cancellation specs.

use super::harness::TestPipeline;
use fortify_core::{Mode, WorkflowStatus};
use std::time::Duration;

#[tokio::test]
async fn reset_clears_state_in_place() {
    let h = TestPipeline::new(&["bar_controller", "baz_controller"]).await;
    h.seed_awaiting_decisions("bar_controller");
    h.pipeline.ask("bar_controller", "why?").unwrap();

    h.pipeline.reset().await;

    let snapshot = h.pipeline.snapshot();
    assert_eq!(snapshot.phase, "idle");
    assert!(snapshot.workflows.is_empty());
    assert!(snapshot.queries.is_empty());
    assert!(snapshot.errors.is_empty());
    assert!(snapshot.active_grants.is_empty());

    // Targets survive; rediscovery re-seeds workflows.
    h.pipeline.discover_targets().unwrap();
    assert_eq!(h.pipeline.snapshot().workflows.len(), 2);
}

#[tokio::test]
async fn reset_cancels_a_hung_tool_call() {
    let h = TestPipeline::hanging(&["bar_controller"]).await;
    h.pipeline.start_analysis("bar_controller", Mode::Hardening).unwrap();

    // The worker is parked inside the hanging tool call.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.status("bar_controller"), WorkflowStatus::Analyzing);
    assert_eq!(h.pipeline.live_workers(), 1);

    tokio::time::timeout(Duration::from_secs(5), h.pipeline.reset())
        .await
        .expect("reset must not hang");

    assert!(h.pipeline.snapshot().workflows.is_empty());
    assert_eq!(h.pipeline.live_workers(), 0);
}

#[tokio::test]
async fn cancellation_token_generation_is_replaced_on_reset() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    let before = h.pipeline.cancel_token();
    h.pipeline.reset().await;
    let after = h.pipeline.cancel_token();

    assert!(before.is_cancelled());
    assert!(!after.is_cancelled());
}

#[tokio::test]
async fn workflows_restart_cleanly_after_reset() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![Ok(serde_json::json!({"findings": []}).to_string())],
        true,
        true,
    )
    .await;

    h.pipeline.reset().await;
    h.pipeline.restart();
    h.pipeline.discover_targets().unwrap();

    h.pipeline.start_analysis("bar_controller", Mode::Hardening).unwrap();
    let status = h
        .wait_until("bar_controller", |s| s == WorkflowStatus::AwaitingDecisions)
        .await;
    assert_eq!(status, WorkflowStatus::AwaitingDecisions);
}

#[tokio::test]
async fn snapshot_is_a_deep_copy() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    let mut snapshot = h.pipeline.snapshot();
    if let Some(wf) = snapshot.workflows.get_mut("bar_controller") {
        wf.status = WorkflowStatus::Complete;
    }
    assert_eq!(h.status("bar_controller"), WorkflowStatus::Idle);
}

#[tokio::test]
async fn failure_in_one_workflow_leaves_others_untouched() {
    let h = TestPipeline::build(
        &["bar_controller", "baz_controller"],
        vec![Err("boom".into())],
        true,
        true,
    )
    .await;

    h.pipeline.start_analysis("bar_controller", Mode::Hardening).unwrap();
    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Error);
    assert_eq!(h.status("baz_controller"), WorkflowStatus::Idle);
}
