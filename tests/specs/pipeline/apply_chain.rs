// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Happy-path apply specs, driven through the HTTP surface.

use crate::prelude::*;

#[tokio::test]
async fn approve_runs_apply_test_lint_verify_to_complete() {
    let spec = Spec::new(vec![
        Ok(json!({"applied": ["f1"]}).to_string()),
        Ok(json!({"verified": true}).to_string()),
    ]);
    spec.seed_awaiting_decisions("bar_controller");
    spec.stage_file(
        "bar_controller",
        "app/controllers/bar_controller.rb",
        "class BarController # hardened\nend\n",
    );

    let response = spec
        .post("/decisions", json!({"controller": "bar_controller", "action": "approve"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(spec.wait_terminal("bar_controller").await, WorkflowStatus::Complete);

    // The staged change landed in the project.
    let body = std::fs::read_to_string(
        spec.tmp.path().join("app/controllers/bar_controller.rb"),
    )
    .unwrap();
    assert!(body.contains("hardened"));

    // Every phase sidecar exists and parses.
    let sidecars = spec.tmp.path().join("app/controllers/.harden/bar_controller");
    for file in ["hardened.json", "test_results.json", "ci_results.json", "verification.json"] {
        let raw = std::fs::read_to_string(sidecars.join(file)).unwrap();
        serde_json::from_str::<Value>(&raw).unwrap();
    }

    // The test runner ran exactly once.
    let runs = std::fs::read_to_string(spec.tmp.path().join("test_runs.txt")).unwrap();
    assert_eq!(runs.lines().count(), 1);

    // The status endpoint reports the terminal state, sanitized.
    let status = body_json(spec.get("/pipeline/status").await).await;
    assert_eq!(status["workflows"]["bar_controller"]["status"], "complete");
}

#[tokio::test]
async fn skip_decision_is_terminal_without_tool_calls() {
    let spec = Spec::new(Vec::new());
    spec.seed_awaiting_decisions("bar_controller");

    let response = spec
        .post("/decisions", json!({"controller": "bar_controller", "action": "skip"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(spec.status_of("bar_controller"), WorkflowStatus::Skipped);
    assert!(spec.invoker.prompts.lock().is_empty());
}

#[tokio::test]
async fn selective_decision_behaves_as_approve_with_notes() {
    let spec = Spec::new(vec![
        Ok(json!({"applied": []}).to_string()),
        Ok(json!({"verified": true}).to_string()),
    ]);
    spec.seed_awaiting_decisions("bar_controller");

    let response = spec
        .post(
            "/decisions",
            json!({
                "controller": "bar_controller",
                "action": "selective",
                "notes": "only the params finding",
                "selected": ["f1"],
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(spec.wait_terminal("bar_controller").await, WorkflowStatus::Complete);

    // The notes rode along on the apply prompt.
    let prompts = spec.invoker.prompts.lock();
    assert!(prompts[0].contains("only the params finding"));
}
