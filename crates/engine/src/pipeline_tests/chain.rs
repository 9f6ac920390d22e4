// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-chain specs: the happy path, fix-loop exhaustion, retries.

use super::harness::TestPipeline;
use crate::pipeline::{Decision, DecisionAction};
use fortify_core::WorkflowStatus;
use serde_json::json;

fn approve() -> (Decision, serde_json::Value) {
    let raw = json!({"action": "approve"});
    (
        Decision {
            action: DecisionAction::Approve,
            notes: None,
            selected: None,
            research: Vec::new(),
        },
        raw,
    )
}

#[tokio::test]
async fn happy_path_apply_runs_the_whole_chain() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            Ok(json!({"applied": ["f1"]}).to_string()),   // apply
            Ok(json!({"verified": true}).to_string()),    // verify
        ],
        true,
        true,
    )
    .await;
    h.seed_awaiting_decisions("bar_controller");
    h.stage_file("bar_controller", "app/controllers/bar_controller.rb", "hardened body\n");

    let (decision, raw) = approve();
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();

    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Complete);

    // The staged file was imported into the project.
    let body =
        std::fs::read_to_string(h.tmp.path().join("app/controllers/bar_controller.rb")).unwrap();
    assert_eq!(body, "hardened body\n");

    // Each phase sidecar exists and parses as JSON.
    for file in ["hardened.json", "test_results.json", "ci_results.json", "verification.json"] {
        let raw = std::fs::read_to_string(h.sidecar_path("bar_controller", file)).unwrap();
        serde_json::from_str::<serde_json::Value>(&raw).unwrap();
    }

    // Tests and lint each ran exactly once.
    assert_eq!(h.run_count("test_runs.txt"), 1);
    assert_eq!(h.run_count("lint_runs.txt"), 1);

    let wf = h.pipeline.workflow("bar_controller").unwrap();
    assert!(wf.completed_at.is_some());
    assert_eq!(wf.verification.unwrap()["verified"], true);
}

#[tokio::test]
async fn test_fix_loop_exhaustion_parks_in_tests_failed() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            Ok(json!({"applied": []}).to_string()), // apply
            Ok(json!({"fix": 1}).to_string()),      // fix attempt 1
            Ok(json!({"fix": 2}).to_string()),      // fix attempt 2
        ],
        false, // tests always fail
        true,
    )
    .await;
    h.seed_awaiting_decisions("bar_controller");

    let (decision, raw) = approve();
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();

    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::TestsFailed);

    // 1 initial run + MAX_FIX_ATTEMPTS (2) reruns.
    assert_eq!(h.run_count("test_runs.txt"), 3);
    // Lint never ran.
    assert_eq!(h.run_count("lint_runs.txt"), 0);
}

#[tokio::test]
async fn lint_fix_loop_exhaustion_parks_in_lint_failed() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            Ok(json!({"applied": []}).to_string()),
            Ok(json!({"fix": 1}).to_string()),
            Ok(json!({"fix": 2}).to_string()),
        ],
        true,
        false, // lint always fails
    )
    .await;
    h.seed_awaiting_decisions("bar_controller");

    let (decision, raw) = approve();
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();

    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::LintFailed);
    assert_eq!(h.run_count("test_runs.txt"), 1);
    assert_eq!(h.run_count("lint_runs.txt"), 3);
}

#[tokio::test]
async fn skip_decision_skips_without_tool_calls() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    h.seed_awaiting_decisions("bar_controller");

    let raw = json!({"action": "skip"});
    let decision = Decision {
        action: DecisionAction::Skip,
        notes: None,
        selected: None,
        research: Vec::new(),
    };
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();

    assert_eq!(h.status("bar_controller"), WorkflowStatus::Skipped);
    assert!(h.invoker.prompts.lock().is_empty());
}

#[tokio::test]
async fn decisions_require_awaiting_decisions_status() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    let (decision, raw) = approve();
    let err = h
        .pipeline
        .submit_decisions("bar_controller", decision, raw)
        .unwrap_err();
    assert!(err.is_guard());
    assert_eq!(h.status("bar_controller"), WorkflowStatus::Idle);
}

#[tokio::test]
async fn analysis_failure_records_error_and_last_active_status() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![Err("tool exploded".into())],
        true,
        true,
    )
    .await;

    h.pipeline
        .start_analysis("bar_controller", fortify_core::Mode::Hardening)
        .unwrap();

    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Error);
    let wf = h.pipeline.workflow("bar_controller").unwrap();
    assert_eq!(wf.last_active_status, Some(WorkflowStatus::Analyzing));
    assert!(wf.error.unwrap().contains("tool exploded"));
    assert!(!h.pipeline.snapshot().errors.is_empty());
}

#[tokio::test]
async fn retry_from_error_reruns_analysis() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            Err("flaky".into()),
            Ok(json!({"findings": []}).to_string()),
        ],
        true,
        true,
    )
    .await;

    h.pipeline
        .start_analysis("bar_controller", fortify_core::Mode::Hardening)
        .unwrap();
    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Error);

    h.pipeline.retry("bar_controller").unwrap();
    let status = h
        .wait_until("bar_controller", |s| s == WorkflowStatus::AwaitingDecisions)
        .await;
    assert_eq!(status, WorkflowStatus::AwaitingDecisions);
}

#[tokio::test]
async fn retry_tests_reenters_apply() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            Ok(json!({"applied": []}).to_string()),
            Ok(json!({"fix": 1}).to_string()),
            Ok(json!({"fix": 2}).to_string()),
            // retry: apply + verify
            Ok(json!({"applied": ["again"]}).to_string()),
            Ok(json!({"verified": true}).to_string()),
        ],
        false,
        true,
    )
    .await;
    h.seed_awaiting_decisions("bar_controller");
    let (decision, raw) = approve();
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();
    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::TestsFailed);

    // Flip the test runner to passing for the retry.
    h.make_tests_pass();

    h.pipeline.retry_tests("bar_controller").unwrap();
    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Complete);
}

#[tokio::test]
async fn retry_tests_requires_tests_failed_status() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    h.seed_awaiting_decisions("bar_controller");
    h.with_workflow("bar_controller", |wf| {
        wf.decision = Some(json!({"action": "approve"}));
    });

    let err = h.pipeline.retry_tests("bar_controller").unwrap_err();
    assert!(err.is_guard());
}

#[tokio::test]
async fn load_analysis_reads_sidecar_from_disk() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    let dir = h.sidecar_path("bar_controller", "");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        h.sidecar_path("bar_controller", "analysis.json"),
        json!({"findings": [{"id": "f9"}]}).to_string(),
    )
    .unwrap();

    h.pipeline.load_analysis("bar_controller").unwrap();
    let wf = h.pipeline.workflow("bar_controller").unwrap();
    assert_eq!(wf.status, WorkflowStatus::AwaitingDecisions);
    assert_eq!(wf.analysis.unwrap()["findings"][0]["id"], "f9");
}

#[tokio::test]
async fn load_analysis_without_sidecar_is_a_guard_failure() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    let err = h.pipeline.load_analysis("bar_controller").unwrap_err();
    assert!(err.is_guard());
}

#[tokio::test]
async fn prompts_are_stored_per_phase() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![Ok(json!({"findings": []}).to_string())],
        true,
        true,
    )
    .await;

    h.pipeline
        .start_analysis("bar_controller", fortify_core::Mode::Hardening)
        .unwrap();
    h.wait_until("bar_controller", |s| s == WorkflowStatus::AwaitingDecisions).await;

    let prompt = h
        .pipeline
        .prompt("bar_controller", crate::phases::PhaseKey::Analyze)
        .unwrap();
    assert!(prompt.contains("bar_controller.rb"));
    assert!(h.pipeline.prompt("bar_controller", crate::phases::PhaseKey::Verify).is_none());
}
